//! Per-CA signing policy.
//!
//! Each role directory carries an `openssl.cnf` describing the CA the way
//! `openssl ca` expects it, so the generated PKI can be operated with stock
//! OpenSSL tooling afterwards. The subject-matching rules of those files are
//! also enforced natively by [`SubjectPolicy`].

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{CaProfile, Role, SubjectName};

/// Subject-matching rule a CA applies to the requests it signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectPolicy {
    /// Country, state and organization must equal the issuer's.
    Strict,
    /// Only a common name is required.
    Loose,
}

impl SubjectPolicy {
    /// Returns the policy a CA role signs with.
    #[must_use]
    pub const fn of(issuer: Role) -> Self {
        match issuer {
            Role::Root => Self::Strict,
            Role::Intermediate | Role::Ocsp => Self::Loose,
        }
    }

    const fn section(self) -> &'static str {
        match self {
            Self::Strict => "policy_strict",
            Self::Loose => "policy_loose",
        }
    }

    /// Checks a requested subject against the issuer's subject.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first field that differs.
    pub fn check(self, issuer: &SubjectName, requested: &SubjectName) -> Result<()> {
        if requested.common_name.trim().is_empty() {
            return Err(Error::Configuration {
                field: "common_name".into(),
                reason: "must be supplied".into(),
            });
        }
        if self == Self::Loose {
            return Ok(());
        }
        let pairs = [
            ("country", &issuer.country, &requested.country),
            ("state", &issuer.state, &requested.state),
            ("organization", &issuer.organization, &requested.organization),
        ];
        for (field, expected, actual) in pairs {
            if expected != actual {
                return Err(Error::Configuration {
                    field: field.into(),
                    reason: format!("must match the issuing CA ('{expected}'), got '{actual}'"),
                });
            }
        }
        Ok(())
    }
}

/// Renders the `openssl.cnf` of `role`, whose directory is `dir`.
#[must_use]
pub fn render(role: Role, profile: &CaProfile, dir: &Path, key_bits: usize) -> String {
    let request = request_section(&profile.subject, key_bits, role);
    match role {
        Role::Ocsp => format!("# OCSP responder request configuration.\n\n{request}"),
        Role::Root | Role::Intermediate => {
            let stem = role.file_stem();
            let crl_number = if role == Role::Intermediate {
                "crlnumber         = $dir/crlnumber\n"
            } else {
                ""
            };
            let mut out = format!(
                "# OpenSSL {role} CA configuration.\n\
                 \n\
                 [ ca ]\n\
                 default_ca        = CA_default\n\
                 \n\
                 [ CA_default ]\n\
                 dir               = {dir}\n\
                 certs             = $dir/certs\n\
                 crl_dir           = $dir/crl\n\
                 new_certs_dir     = $dir/certs\n\
                 database          = $dir/index.txt\n\
                 serial            = $dir/serial\n\
                 {crl_number}\
                 private_key       = $dir/{stem}.key.pem\n\
                 certificate       = $dir/{stem}.cert.pem\n\
                 crl               = $dir/crl/{stem}.crl.pem\n\
                 crl_extensions    = crl_ext\n\
                 default_crl_days  = 30\n\
                 default_md        = sha256\n\
                 name_opt          = ca_default\n\
                 cert_opt          = ca_default\n\
                 default_days      = {days}\n\
                 preserve          = no\n\
                 policy            = {policy}\n\
                 \n\
                 [ policy_strict ]\n\
                 countryName             = match\n\
                 stateOrProvinceName     = match\n\
                 organizationName        = match\n\
                 organizationalUnitName  = optional\n\
                 commonName              = supplied\n\
                 emailAddress            = optional\n\
                 \n\
                 [ policy_loose ]\n\
                 countryName             = optional\n\
                 stateOrProvinceName     = optional\n\
                 localityName            = optional\n\
                 organizationName        = optional\n\
                 organizationalUnitName  = optional\n\
                 commonName              = supplied\n\
                 emailAddress            = optional\n\
                 \n\
                 {request}\n\
                 [ v3_ca ]\n\
                 subjectKeyIdentifier    = hash\n\
                 authorityKeyIdentifier  = keyid:always,issuer\n\
                 basicConstraints        = critical, CA:true\n\
                 keyUsage                = critical, digitalSignature, cRLSign, keyCertSign\n\
                 \n\
                 [ v3_intermediate_ca ]\n\
                 subjectKeyIdentifier    = hash\n\
                 authorityKeyIdentifier  = keyid:always,issuer\n\
                 basicConstraints        = critical, CA:true, pathlen:0\n\
                 keyUsage                = critical, digitalSignature, cRLSign, keyCertSign\n\
                 \n\
                 [ crl_ext ]\n\
                 authorityKeyIdentifier  = keyid:always\n\
                 \n\
                 [ ocsp ]\n\
                 basicConstraints        = CA:FALSE\n\
                 subjectKeyIdentifier    = hash\n\
                 authorityKeyIdentifier  = keyid,issuer\n\
                 keyUsage                = critical, digitalSignature\n\
                 extendedKeyUsage        = critical, OCSPSigning\n",
                dir = dir.display(),
                days = profile.days,
                policy = SubjectPolicy::of(role).section(),
            );
            if role == Role::Intermediate {
                out.push_str(&leaf_sections(profile));
            }
            out
        }
    }
}

fn request_section(subject: &SubjectName, key_bits: usize, role: Role) -> String {
    let extensions = match role {
        Role::Root => "x509_extensions     = v3_ca\n",
        Role::Intermediate | Role::Ocsp => "",
    };
    format!(
        "[ req ]\n\
         default_bits        = {key_bits}\n\
         distinguished_name  = req_distinguished_name\n\
         string_mask         = utf8only\n\
         default_md          = sha256\n\
         prompt              = no\n\
         {extensions}\
         \n\
         [ req_distinguished_name ]\n\
         C                   = {}\n\
         ST                  = {}\n\
         L                   = {}\n\
         O                   = {}\n\
         CN                  = {}\n",
        subject.country, subject.state, subject.locality, subject.organization, subject.common_name,
    )
}

/// Sections the intermediate uses for end-entity certificates.
fn leaf_sections(profile: &CaProfile) -> String {
    let mut pointers = String::new();
    if let Some(crl) = &profile.crl_url {
        pointers.push_str(&format!("crlDistributionPoints   = URI:{crl}\n"));
    }
    if let Some(ocsp) = &profile.ocsp_url {
        pointers.push_str(&format!("authorityInfoAccess     = OCSP;URI:{ocsp}\n"));
    }
    format!(
        "\n\
         [ usr_cert ]\n\
         basicConstraints        = CA:FALSE\n\
         subjectKeyIdentifier    = hash\n\
         authorityKeyIdentifier  = keyid,issuer\n\
         keyUsage                = critical, nonRepudiation, digitalSignature, keyEncipherment\n\
         extendedKeyUsage        = clientAuth, emailProtection\n\
         {pointers}\
         \n\
         [ server_cert ]\n\
         basicConstraints        = CA:FALSE\n\
         subjectKeyIdentifier    = hash\n\
         authorityKeyIdentifier  = keyid,issuer:always\n\
         keyUsage                = critical, digitalSignature, keyEncipherment\n\
         extendedKeyUsage        = serverAuth\n\
         {pointers}"
    )
}
