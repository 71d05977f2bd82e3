//! Certificate Authority signing.
//!
//! [`self_sign`] creates the root certificate. [`sign`] issues a certificate
//! for a request under an existing CA, taking the serial from the CA's state
//! and returning the advanced state alongside the certificate. Input state is
//! never mutated, so a failed signing leaves nothing to roll back.

use chrono::{DateTime, Duration, Utc};
use pki_types::{CertificateDer, CertificateSigningRequestDer};
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, CrlDistributionPoint,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SerialNumber,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509CertificationRequest};

use crate::csr::{CertificateRequest, distinguished_name};
use crate::error::{Error, Result};
use crate::keygen::KeyMaterial;
use crate::state::CaState;
use crate::types::{CaProfile, Certificate, Purpose, Role};

/// Extension set applied to an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtensionProfile {
    /// Root CA: CA with unconstrained path length.
    #[serde(rename = "v3_ca")]
    V3Ca,
    /// Intermediate CA: CA with path length 0.
    #[serde(rename = "v3_intermediate_ca")]
    V3IntermediateCa,
    /// OCSP responder: not a CA, OCSP signing only.
    #[serde(rename = "ocsp")]
    Ocsp,
}

impl ExtensionProfile {
    /// Returns the OpenSSL section name of the profile.
    #[must_use]
    pub const fn section(self) -> &'static str {
        match self {
            Self::V3Ca => "v3_ca",
            Self::V3IntermediateCa => "v3_intermediate_ca",
            Self::Ocsp => "ocsp",
        }
    }

    /// Returns the profile used to issue a certificate for `purpose`.
    #[must_use]
    pub const fn for_purpose(purpose: Purpose) -> Self {
        match purpose {
            Purpose::Root => Self::V3Ca,
            Purpose::Intermediate => Self::V3IntermediateCa,
            Purpose::OcspResponder => Self::Ocsp,
        }
    }

    /// Returns `true` if the profile issues CA certificates.
    #[must_use]
    pub const fn is_ca(self) -> bool {
        matches!(self, Self::V3Ca | Self::V3IntermediateCa)
    }

    fn apply(self, params: &mut CertificateParams, crl_url: Option<&str>) {
        let ca_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages.clear();
        params.crl_distribution_points.clear();
        match self {
            Self::V3Ca => {
                params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
                params.key_usages = ca_usages;
            }
            Self::V3IntermediateCa => {
                params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
                params.key_usages = ca_usages;
            }
            Self::Ocsp => {
                params.is_ca = IsCa::ExplicitNoCa;
                params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
                params.extended_key_usages = vec![ExtendedKeyUsagePurpose::OcspSigning];
                params.crl_distribution_points = crl_url
                    .map(|url| {
                        vec![CrlDistributionPoint {
                            uris: vec![url.to_owned()],
                        }]
                    })
                    .unwrap_or_default();
            }
        }
    }
}

/// A CA able to sign: its role, certificate and private key.
#[derive(Debug, Clone)]
pub struct Issuer {
    role: Role,
    certificate: Certificate,
    key: KeyMaterial,
    crl_url: Option<String>,
}

impl Issuer {
    /// Creates an issuer from its certificate and key.
    #[must_use]
    pub const fn new(role: Role, certificate: Certificate, key: KeyMaterial) -> Self {
        Self {
            role,
            certificate,
            key,
            crl_url: None,
        }
    }

    /// Sets the CRL distribution URL stamped on responder certificates.
    #[must_use]
    pub fn with_crl_url(mut self, url: Option<String>) -> Self {
        self.crl_url = url;
        self
    }

    /// Returns the issuer role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the issuer certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn check(&self, state: &CaState, profile: ExtensionProfile) -> Result<()> {
        if state.role != self.role {
            return Err(Error::IssuerKeyMismatch(format!(
                "{} state supplied for {} issuer",
                state.role, self.role
            )));
        }
        if self.certificate.public_key() != self.key.public_key_der() {
            return Err(Error::IssuerKeyMismatch(format!(
                "key does not belong to issuer certificate '{}'",
                self.certificate.subject().common_name
            )));
        }
        if !self.certificate.is_ca() {
            return Err(Error::IssuerKeyMismatch(format!(
                "issuer certificate '{}' is not a CA",
                self.certificate.subject().common_name
            )));
        }
        if profile.is_ca() && self.certificate.path_len() == Some(0) {
            return Err(Error::Signing(format!(
                "'{}' has path length 0 and cannot issue CA certificates",
                self.certificate.subject().common_name
            )));
        }
        Ok(())
    }
}

/// Creates the self-signed root certificate.
///
/// # Errors
///
/// Returns [`Error::ExpiredValidityWindow`] if `profile.days <= 0`,
/// [`Error::ProfileValidation`] for an incomplete subject, or
/// [`Error::Signing`] if signing fails.
pub fn self_sign(key: &KeyMaterial, profile: &CaProfile) -> Result<Certificate> {
    profile.subject.validate()?;
    let (not_before, not_after) = validity_window(profile.days)?;

    info!(subject = %profile.subject.common_name, days = profile.days, "self-signing root certificate");

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&profile.subject);
    params.serial_number = Some(random_serial());
    params.not_before = not_before;
    params.not_after = not_after;
    ExtensionProfile::V3Ca.apply(&mut params, None);

    let key_pair = key.signing_key()?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Signing(format!("failed to self-sign root certificate: {e}")))?;

    Certificate::from_der(cert.der())
}

/// Signs `request` under `issuer`, consuming the current serial of `state`.
///
/// The certificate's serial equals `state.serial`; the returned state has
/// the serial advanced by one and exactly one new ledger entry.
///
/// # Errors
///
/// Returns [`Error::ExpiredValidityWindow`] if `validity_days <= 0`,
/// [`Error::IssuerKeyMismatch`] if the issuer certificate, key and state do
/// not belong together, or [`Error::Signing`] if the request is invalid or
/// signing fails.
pub fn sign(
    request: CertificateRequest,
    issuer: &Issuer,
    state: &CaState,
    profile: ExtensionProfile,
    validity_days: i64,
) -> Result<(Certificate, CaState)> {
    let (not_before, not_after) = validity_window(validity_days)?;
    issuer.check(state, profile)?;

    if ExtensionProfile::for_purpose(request.purpose()) != profile {
        return Err(Error::Signing(format!(
            "request built for {:?} cannot be signed with the {} profile",
            request.purpose(),
            profile.section()
        )));
    }
    verify_request(&request)?;

    let csr_der = CertificateSigningRequestDer::from(request.der().to_vec());
    let mut csr = CertificateSigningRequestParams::from_der(&csr_der)
        .map_err(|e| Error::Signing(format!("failed to parse request: {e}")))?;

    csr.params.serial_number = Some(SerialNumber::from(state.serial));
    csr.params.not_before = not_before;
    csr.params.not_after = not_after;
    csr.params.use_authority_key_identifier_extension = true;
    profile.apply(&mut csr.params, issuer.crl_url.as_deref());

    let issuer_key = issuer.key.signing_key()?;
    let issuer_cert = issuer_handle(&issuer.certificate, &issuer_key)?;
    let signed = csr
        .signed_by(&issuer_cert, &issuer_key)
        .map_err(|e| Error::Signing(format!("failed to sign certificate: {e}")))?;

    let certificate = Certificate::from_der(signed.der())?;
    let updated = state.record_issuance(
        certificate.subject().to_openssl_string(),
        certificate.not_after(),
    )?;

    info!(
        issuer = %issuer.role,
        subject = %certificate.subject().common_name,
        serial = state.serial,
        profile = profile.section(),
        "issued certificate"
    );

    Ok((certificate, updated))
}

/// Checks the request's self-signature and that it was made by the key it names.
fn verify_request(request: &CertificateRequest) -> Result<()> {
    let (_, parsed) = X509CertificationRequest::from_der(request.der())
        .map_err(|e| Error::Signing(format!("malformed request: {e}")))?;
    parsed
        .verify_signature()
        .map_err(|e| Error::Signing(format!("request signature does not verify: {e}")))?;
    if parsed.certification_request_info.subject_pki.raw != request.public_key() {
        return Err(Error::Signing(
            "request public key does not match the requesting key".into(),
        ));
    }
    debug!(subject = %request.subject().common_name, "request signature verified");
    Ok(())
}

/// Rebuilds an rcgen issuer certificate from a stored CA certificate.
fn issuer_handle(certificate: &Certificate, key: &rcgen::KeyPair) -> Result<rcgen::Certificate> {
    let der = CertificateDer::from(certificate.der().to_vec());
    let params = CertificateParams::from_ca_cert_der(&der)
        .map_err(|e| Error::Parse(format!("failed to read issuer certificate: {e}")))?;
    params
        .self_signed(key)
        .map_err(|e| Error::Signing(format!("failed to load issuer: {e}")))
}

/// Latest instant a certificate can be valid until: 9999-12-31T23:59:59Z,
/// the end of the `GeneralizedTime` range.
pub const LATEST_NOT_AFTER: i64 = 253_402_300_799;

/// Longest validity, in days, that a certificate issued now can have.
#[must_use]
pub fn max_validity_days() -> i64 {
    (LATEST_NOT_AFTER - Utc::now().timestamp()) / 86_400
}

/// Returns `(now, now + days)` truncated to whole seconds.
fn validity_window(days: i64) -> Result<(OffsetDateTime, OffsetDateTime)> {
    if days <= 0 {
        return Err(Error::ExpiredValidityWindow { days });
    }
    let now = Utc::now();
    let not_after = Duration::try_days(days)
        .and_then(|span| now.checked_add_signed(span))
        .filter(|end| end.timestamp() <= LATEST_NOT_AFTER)
        .ok_or_else(|| Error::Validation(format!("validity of {days} days ends after 9999-12-31")))?;
    Ok((to_rcgen_time(now)?, to_rcgen_time(not_after)?))
}

/// Converts a chrono `DateTime` to rcgen `OffsetDateTime`.
fn to_rcgen_time(dt: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::Validation(format!("invalid timestamp: {e}")))
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    // Positive and without a leading zero octet.
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    SerialNumber::from(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::CertificateRequestBuilder;
    use crate::state::INITIAL_SERIAL;
    use crate::test_support::{profile, test_key};
    use crate::validation::validate_certificate;
    use test_case::test_case;

    fn root_issuer() -> Issuer {
        let key = test_key(0);
        let cert = self_sign(&key, &profile("Test Root CA", 3650)).unwrap();
        Issuer::new(Role::Root, cert, key)
    }

    fn intermediate_request() -> CertificateRequest {
        CertificateRequestBuilder
            .build(
                &test_key(1),
                &profile("Test Intermediate CA", 1825),
                Purpose::Intermediate,
            )
            .unwrap()
    }

    #[test]
    fn self_signed_root_matches_profile() {
        let profile = profile("Test Root CA", 3650);
        let cert = self_sign(&test_key(0), &profile).unwrap();

        assert_eq!(cert.subject(), &profile.subject);
        assert_eq!(cert.issuer(), "Test Root CA");
        assert_eq!(cert.not_after() - cert.not_before(), Duration::days(3650));
        assert!(cert.is_ca());
        assert_eq!(cert.path_len(), None);
        assert!(cert.key_usage().key_cert_sign);
        assert!(cert.key_usage().crl_sign);
        assert_eq!(cert.public_key(), test_key(0).public_key_der());
    }

    #[test]
    fn self_sign_rejects_empty_window() {
        let err = self_sign(&test_key(0), &profile("Root", 0)).unwrap_err();
        assert!(matches!(err, Error::ExpiredValidityWindow { days: 0 }));
    }

    #[test]
    fn validity_past_year_9999_is_rejected_before_signing() {
        let err = self_sign(&test_key(0), &profile("Root", 3_000_000)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");

        let days = max_validity_days();
        assert!(validity_window(days - 1).is_ok());
        assert!(validity_window(days + 1).is_err());
    }

    #[test]
    fn sign_consumes_current_serial() {
        let issuer = root_issuer();
        let state = CaState::new(Role::Root).unwrap();

        let (cert, updated) = sign(
            intermediate_request(),
            &issuer,
            &state,
            ExtensionProfile::V3IntermediateCa,
            1825,
        )
        .unwrap();

        assert_eq!(cert.serial_u64(), Some(INITIAL_SERIAL));
        assert_eq!(updated.serial, state.serial + 1);
        assert_eq!(updated.ledger.len(), state.ledger.len() + 1);
        assert_eq!(
            updated.record(INITIAL_SERIAL).unwrap().subject,
            cert.subject().to_openssl_string()
        );
        assert_eq!(cert.issuer(), "Test Root CA");
        assert!(cert.is_ca());
        assert_eq!(cert.path_len(), Some(0));
        assert_eq!(cert.not_after() - cert.not_before(), Duration::days(1825));

        validate_certificate(&cert, issuer.certificate()).unwrap();
    }

    #[test_case(0, false ; "zero days fails")]
    #[test_case(-5, false ; "negative days fails")]
    #[test_case(1, true ; "one day succeeds")]
    fn validity_boundary(days: i64, ok: bool) {
        let issuer = root_issuer();
        let state = CaState::new(Role::Root).unwrap();

        let result = sign(
            intermediate_request(),
            &issuer,
            &state,
            ExtensionProfile::V3IntermediateCa,
            days,
        );

        if ok {
            let (cert, _) = result.unwrap();
            assert_eq!(cert.not_after() - cert.not_before(), Duration::days(1));
        } else {
            assert!(matches!(
                result.unwrap_err(),
                Error::ExpiredValidityWindow { days: d } if d == days
            ));
        }
    }

    #[test]
    fn foreign_issuer_key_is_rejected() {
        let root = root_issuer();
        let forged = Issuer::new(Role::Root, root.certificate().clone(), test_key(2));
        let state = CaState::new(Role::Root).unwrap();

        let err = sign(
            intermediate_request(),
            &forged,
            &state,
            ExtensionProfile::V3IntermediateCa,
            30,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IssuerKeyMismatch(_)));
    }

    #[test]
    fn state_of_another_ca_is_rejected() {
        let state = CaState::new(Role::Intermediate).unwrap();
        let err = sign(
            intermediate_request(),
            &root_issuer(),
            &state,
            ExtensionProfile::V3IntermediateCa,
            30,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IssuerKeyMismatch(_)));
    }

    #[test]
    fn profile_must_match_request_purpose() {
        let state = CaState::new(Role::Root).unwrap();
        let err = sign(
            intermediate_request(),
            &root_issuer(),
            &state,
            ExtensionProfile::Ocsp,
            30,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn ocsp_certificate_extensions() {
        let root = root_issuer();
        let (intermediate_cert, _) = sign(
            intermediate_request(),
            &root,
            &CaState::new(Role::Root).unwrap(),
            ExtensionProfile::V3IntermediateCa,
            1825,
        )
        .unwrap();
        let intermediate = Issuer::new(Role::Intermediate, intermediate_cert, test_key(1))
            .with_crl_url(Some("http://crl.example.com/intermediate.crl".into()));

        let request = CertificateRequestBuilder
            .build(
                &test_key(2),
                &profile("ocsp.example.com", 3650),
                Purpose::OcspResponder,
            )
            .unwrap();
        let state = CaState::new(Role::Intermediate).unwrap();
        let (ocsp, updated) =
            sign(request, &intermediate, &state, ExtensionProfile::Ocsp, 3650).unwrap();

        assert!(!ocsp.is_ca());
        assert!(ocsp.is_ocsp_signer());
        assert!(ocsp.key_usage().digital_signature);
        assert!(!ocsp.key_usage().crl_sign);
        assert!(!ocsp.key_usage().key_cert_sign);
        assert_eq!(ocsp.crl_urls(), ["http://crl.example.com/intermediate.crl"]);
        assert_eq!(ocsp.serial_u64(), Some(1000));
        assert_eq!(updated.crl_number, Some(1000));
        validate_certificate(&ocsp, intermediate.certificate()).unwrap();
    }

    #[test]
    fn intermediate_cannot_issue_subordinate_cas() {
        let root = root_issuer();
        let (intermediate_cert, _) = sign(
            intermediate_request(),
            &root,
            &CaState::new(Role::Root).unwrap(),
            ExtensionProfile::V3IntermediateCa,
            30,
        )
        .unwrap();
        let intermediate = Issuer::new(Role::Intermediate, intermediate_cert, test_key(1));
        let request = CertificateRequestBuilder
            .build(&test_key(2), &profile("Sub CA", 30), Purpose::Intermediate)
            .unwrap();

        let err = sign(
            request,
            &intermediate,
            &CaState::new(Role::Intermediate).unwrap(),
            ExtensionProfile::V3IntermediateCa,
            30,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn root_serial_is_random_and_positive() {
        let a = self_sign(&test_key(0), &profile("Root", 1)).unwrap();
        let b = self_sign(&test_key(0), &profile("Root", 1)).unwrap();
        assert_ne!(a.serial(), b.serial());
        assert!(a.serial()[0] & 0x80 == 0);
    }
}
