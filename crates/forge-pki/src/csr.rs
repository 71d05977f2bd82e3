//! Certificate signing request construction.

use rcgen::{CertificateParams, DistinguishedName, DnType};
use tracing::debug;

use crate::error::{Error, Result};
use crate::keygen::KeyMaterial;
use crate::types::{CaProfile, Purpose, SubjectName, pem_encode};

/// A signed request binding a public key to a subject.
///
/// Consumed by value when signed, so a request is never reused.
#[derive(Debug)]
pub struct CertificateRequest {
    der: Vec<u8>,
    purpose: Purpose,
    subject: SubjectName,
    public_key: Vec<u8>,
}

impl CertificateRequest {
    /// Returns the DER-encoded request.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded request.
    #[must_use]
    pub fn pem(&self) -> String {
        pem_encode("CERTIFICATE REQUEST", &self.der)
    }

    /// Returns the purpose the request was built for.
    #[must_use]
    pub const fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// Returns the requested subject.
    #[must_use]
    pub const fn subject(&self) -> &SubjectName {
        &self.subject
    }

    /// Returns the DER SubjectPublicKeyInfo of the requesting key.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

/// Builds signing requests from a key and a profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateRequestBuilder;

impl CertificateRequestBuilder {
    /// Builds a request for `profile` signed by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProfileValidation`] if a subject field is empty, or
    /// [`Error::Signing`] if the request cannot be signed.
    pub fn build(
        &self,
        key: &KeyMaterial,
        profile: &CaProfile,
        purpose: Purpose,
    ) -> Result<CertificateRequest> {
        profile.subject.validate()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&profile.subject);

        let key_pair = key.signing_key()?;
        let request = params
            .serialize_request(&key_pair)
            .map_err(|e| Error::Signing(format!("failed to sign request: {e}")))?;

        debug!(
            subject = %profile.subject.common_name,
            ?purpose,
            "built certificate signing request"
        );

        Ok(CertificateRequest {
            der: request.der().to_vec(),
            purpose,
            subject: profile.subject.clone(),
            public_key: key.public_key_der().to_vec(),
        })
    }
}

/// Converts subject fields to an rcgen distinguished name.
pub(crate) fn distinguished_name(subject: &SubjectName) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CountryName, subject.country.as_str());
    name.push(DnType::StateOrProvinceName, subject.state.as_str());
    name.push(DnType::LocalityName, subject.locality.as_str());
    name.push(DnType::OrganizationName, subject.organization.as_str());
    name.push(DnType::CommonName, subject.common_name.as_str());
    name
}
