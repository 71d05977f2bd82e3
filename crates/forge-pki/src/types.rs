//! Core PKI types: roles, profiles, passphrases and parsed certificates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// A participant in the two-tier hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Self-signed root CA.
    Root,
    /// Intermediate CA signed by the root.
    Intermediate,
    /// OCSP responder signed by the intermediate.
    Ocsp,
}

impl Role {
    /// All roles in bootstrap order.
    pub const ALL: [Self; 3] = [Self::Root, Self::Intermediate, Self::Ocsp];

    /// Returns `true` if the role signs certificates and keeps CA state.
    #[must_use]
    pub const fn is_ca(self) -> bool {
        matches!(self, Self::Root | Self::Intermediate)
    }

    /// Directory of the role relative to the PKI root.
    #[must_use]
    pub const fn dir(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Intermediate => "intermediate",
            Self::Ocsp => "intermediate/ocsp",
        }
    }

    /// File name stem used for the role's key, request and certificate.
    #[must_use]
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Intermediate => "intermediate",
            Self::Ocsp => "ocsp",
        }
    }

    /// Returns the role that signs this role's certificate.
    #[must_use]
    pub const fn issuer(self) -> Self {
        match self {
            Self::Root | Self::Intermediate => Self::Root,
            Self::Ocsp => Self::Intermediate,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Certificate purpose a request is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Self-signed root CA.
    Root,
    /// Subordinate CA.
    Intermediate,
    /// OCSP response signer.
    OcspResponder,
}

impl Purpose {
    /// Returns the purpose of the given role.
    #[must_use]
    pub const fn for_role(role: Role) -> Self {
        match role {
            Role::Root => Self::Root,
            Role::Intermediate => Self::Intermediate,
            Role::Ocsp => Self::OcspResponder,
        }
    }
}

/// Subject distinguished name fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubjectName {
    /// Two-letter country code (C).
    pub country: String,
    /// State or province (ST).
    pub state: String,
    /// Locality (L).
    pub locality: String,
    /// Organization (O).
    pub organization: String,
    /// Common name (CN).
    pub common_name: String,
}

impl SubjectName {
    /// Validates that every field is present and can be written into an
    /// OpenSSL `index.txt` line, which has no escaping for `/` or `=`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProfileValidation`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("country", &self.country),
            ("state", &self.state),
            ("locality", &self.locality),
            ("organization", &self.organization),
            ("common_name", &self.common_name),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::ProfileValidation {
                    field,
                    reason: "must not be empty".into(),
                });
            }
            if let Some(c) = value.chars().find(|c| matches!(c, '/' | '=') || c.is_control()) {
                return Err(Error::ProfileValidation {
                    field,
                    reason: format!("must not contain {c:?}"),
                });
            }
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::ProfileValidation {
                field: "country",
                reason: format!("must be a two-letter code, got '{}'", self.country),
            });
        }
        Ok(())
    }

    /// Formats the name the way OpenSSL writes it into `index.txt`.
    #[must_use]
    pub fn to_openssl_string(&self) -> String {
        format!(
            "/C={}/ST={}/L={}/O={}/CN={}",
            self.country, self.state, self.locality, self.organization, self.common_name
        )
    }

    fn from_x509(name: &X509Name<'_>) -> Self {
        fn first<'a, 'b: 'a>(
            mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
        ) -> String {
            attrs
                .next()
                .and_then(|attr| attr.as_str().ok())
                .map(String::from)
                .unwrap_or_default()
        }

        Self {
            country: first(name.iter_country()),
            state: first(name.iter_state_or_province()),
            locality: first(name.iter_locality()),
            organization: first(name.iter_organization()),
            common_name: first(name.iter_common_name()),
        }
    }
}

/// Secret passphrase protecting a private key at rest.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(transparent)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wraps a passphrase.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the passphrase bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns `true` if the passphrase is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

/// Identity and policy attributes of one CA or leaf role.
#[derive(Debug, Clone)]
pub struct CaProfile {
    /// Subject fields.
    pub subject: SubjectName,
    /// Validity period in days.
    pub days: i64,
    /// OCSP responder URL advertised by this CA.
    pub ocsp_url: Option<String>,
    /// CRL distribution URL advertised by this CA.
    pub crl_url: Option<String>,
    /// Passphrase protecting the role's private key.
    pub passphrase: Passphrase,
}

impl CaProfile {
    /// Creates a profile without OCSP or CRL pointers.
    #[must_use]
    pub fn new(subject: SubjectName, days: i64, passphrase: Passphrase) -> Self {
        Self {
            subject,
            days,
            ocsp_url: None,
            crl_url: None,
            passphrase,
        }
    }

    /// Sets the OCSP responder URL.
    #[must_use]
    pub fn with_ocsp_url(mut self, url: impl Into<String>) -> Self {
        self.ocsp_url = Some(url.into());
        self
    }

    /// Sets the CRL distribution URL.
    #[must_use]
    pub fn with_crl_url(mut self, url: impl Into<String>) -> Self {
        self.crl_url = Some(url.into());
        self
    }
}

/// Key usage bits relevant to CA and responder certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyUsageFlags {
    /// digitalSignature
    pub digital_signature: bool,
    /// keyCertSign
    pub key_cert_sign: bool,
    /// cRLSign
    pub crl_sign: bool,
}

/// A DER-encoded X.509 certificate with metadata.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    serial: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    subject: SubjectName,
    issuer: String,
    raw_subject: Vec<u8>,
    raw_issuer: Vec<u8>,
    is_ca: bool,
    path_len: Option<u32>,
    key_usage: KeyUsageFlags,
    ocsp_signing: bool,
    crl_urls: Vec<String>,
    public_key: Vec<u8>,
}

impl Certificate {
    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_before timestamp".into()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_after timestamp".into()))?;

        let (is_ca, path_len) = match cert.basic_constraints() {
            Ok(Some(ext)) => (ext.value.ca, ext.value.path_len_constraint),
            Ok(None) => (false, None),
            Err(e) => return Err(Error::Parse(format!("bad basic constraints: {e}"))),
        };

        let key_usage = match cert.key_usage() {
            Ok(Some(ext)) => KeyUsageFlags {
                digital_signature: ext.value.digital_signature(),
                key_cert_sign: ext.value.key_cert_sign(),
                crl_sign: ext.value.crl_sign(),
            },
            Ok(None) => KeyUsageFlags::default(),
            Err(e) => return Err(Error::Parse(format!("bad key usage: {e}"))),
        };

        let ocsp_signing = match cert.extended_key_usage() {
            Ok(Some(ext)) => ext.value.ocsp_signing,
            Ok(None) => false,
            Err(e) => return Err(Error::Parse(format!("bad extended key usage: {e}"))),
        };

        Ok(Self {
            der: der.to_vec(),
            serial: cert.raw_serial().to_vec(),
            not_before,
            not_after,
            subject: SubjectName::from_x509(cert.subject()),
            issuer: SubjectName::from_x509(cert.issuer()).common_name,
            raw_subject: cert.subject().as_raw().to_vec(),
            raw_issuer: cert.issuer().as_raw().to_vec(),
            is_ca,
            path_len,
            key_usage,
            ocsp_signing,
            crl_urls: extract_crl_urls(&cert),
            public_key: cert.public_key().raw.to_vec(),
        })
    }

    /// Parses a certificate from a PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or the certificate is malformed.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| Error::Parse(format!("failed to parse PEM: {e}")))?;
        if block.label != "CERTIFICATE" {
            return Err(Error::Parse(format!("unexpected PEM label '{}'", block.label)));
        }
        Self::from_der(&block.contents)
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        pem_encode("CERTIFICATE", &self.der)
    }

    /// Returns the raw big-endian serial number.
    #[must_use]
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Returns the serial as upper-case hex, as OpenSSL prints it.
    #[must_use]
    pub fn serial_hex(&self) -> String {
        self.serial.iter().map(|b| format!("{b:02X}")).collect()
    }

    /// Returns the serial number if it fits in a `u64`.
    #[must_use]
    pub fn serial_u64(&self) -> Option<u64> {
        let significant: Vec<u8> = self.serial.iter().copied().skip_while(|b| *b == 0).collect();
        if significant.len() > 8 {
            return None;
        }
        Some(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the subject name.
    #[must_use]
    pub const fn subject(&self) -> &SubjectName {
        &self.subject
    }

    /// Returns the issuer common name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the DER-encoded subject distinguished name.
    #[must_use]
    pub fn raw_subject(&self) -> &[u8] {
        &self.raw_subject
    }

    /// Returns the DER-encoded issuer distinguished name.
    #[must_use]
    pub fn raw_issuer(&self) -> &[u8] {
        &self.raw_issuer
    }

    /// Returns `true` if basic constraints mark this certificate as a CA.
    #[must_use]
    pub const fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Returns the path length constraint, if any.
    #[must_use]
    pub const fn path_len(&self) -> Option<u32> {
        self.path_len
    }

    /// Returns the key usage bits.
    #[must_use]
    pub const fn key_usage(&self) -> KeyUsageFlags {
        self.key_usage
    }

    /// Returns `true` if the extended key usage includes OCSP signing.
    #[must_use]
    pub const fn is_ocsp_signer(&self) -> bool {
        self.ocsp_signing
    }

    /// Returns the CRL distribution point URLs.
    #[must_use]
    pub fn crl_urls(&self) -> &[String] {
        &self.crl_urls
    }

    /// Returns the DER-encoded SubjectPublicKeyInfo.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

fn extract_crl_urls(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut urls = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() {
            for point in &points.points {
                if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                    for name in names {
                        if let GeneralName::URI(uri) = name {
                            urls.push((*uri).to_string());
                        }
                    }
                }
            }
        }
    }
    urls
}

/// Encodes DER bytes as a PEM block with LF line endings.
pub(crate) fn pem_encode(label: &str, der: &[u8]) -> String {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        b64.as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    )
}
