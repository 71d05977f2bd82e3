//! Certificate validation utilities.

use chrono::Utc;
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};
use crate::types::Certificate;

/// Validates a certificate against its issuing CA certificate.
///
/// Checks the validity window, that the issuer name matches the CA's
/// subject, and that the CA's key produced the signature.
///
/// # Errors
///
/// Returns [`Error::Validation`] if any check fails.
pub fn validate_certificate(cert: &Certificate, ca_cert: &Certificate) -> Result<()> {
    let subject = &cert.subject().common_name;
    debug!(%subject, issuer = %ca_cert.subject().common_name, "validating certificate");

    if is_expired(cert) {
        return Err(Error::Validation(format!("'{subject}' has expired")));
    }
    if is_not_yet_valid(cert) {
        return Err(Error::Validation(format!("'{subject}' is not yet valid")));
    }
    if !ca_cert.is_ca() {
        return Err(Error::Validation(format!(
            "'{}' is not a CA and cannot issue '{subject}'",
            ca_cert.subject().common_name
        )));
    }
    if cert.raw_issuer() != ca_cert.raw_subject() {
        return Err(Error::Validation(format!(
            "issuer of '{subject}' does not match CA subject '{}'",
            ca_cert.subject().to_openssl_string()
        )));
    }

    verify_signature(cert, ca_cert)
}

/// Validates a chain ordered from the leaf to the self-signed root.
///
/// # Errors
///
/// Returns [`Error::EmptyChain`] for an empty slice, or
/// [`Error::Validation`] if any link does not verify.
pub fn validate_chain(chain: &[Certificate]) -> Result<()> {
    let Some(root) = chain.last() else {
        return Err(Error::EmptyChain);
    };

    for pair in chain.windows(2) {
        validate_certificate(&pair[0], &pair[1])?;
    }
    validate_self_signed(root)
}

/// Checks if a certificate is expired.
#[must_use]
pub fn is_expired(cert: &Certificate) -> bool {
    cert.not_after() < Utc::now()
}

/// Checks if a certificate is not yet valid.
#[must_use]
pub fn is_not_yet_valid(cert: &Certificate) -> bool {
    cert.not_before() > Utc::now()
}

/// Checks if a certificate is currently within its validity window.
#[must_use]
pub fn is_valid_now(cert: &Certificate) -> bool {
    !is_expired(cert) && !is_not_yet_valid(cert)
}

/// Returns the time left until expiry, or `None` if already expired.
#[must_use]
pub fn remaining_validity(cert: &Certificate) -> Option<chrono::Duration> {
    let now = Utc::now();
    (cert.not_after() > now).then(|| cert.not_after() - now)
}

fn validate_self_signed(cert: &Certificate) -> Result<()> {
    if cert.raw_issuer() != cert.raw_subject() {
        return Err(Error::Validation(format!(
            "chain ends in '{}', which is not self-signed",
            cert.subject().common_name
        )));
    }
    if !is_valid_now(cert) {
        return Err(Error::Validation(format!(
            "root '{}' is outside its validity window",
            cert.subject().common_name
        )));
    }
    verify_signature(cert, cert)
}

/// Verifies that a certificate was signed by the given issuer.
fn verify_signature(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let (_, parsed_cert) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;
    let (_, parsed_issuer) = X509Certificate::from_der(issuer.der())
        .map_err(|e| Error::Parse(format!("failed to parse issuer certificate: {e}")))?;

    parsed_cert
        .verify_signature(Some(parsed_issuer.public_key()))
        .map_err(|e| {
            Error::Validation(format!(
                "signature of '{}' does not verify against '{}': {e:?}",
                cert.subject().common_name,
                issuer.subject().common_name
            ))
        })
}
