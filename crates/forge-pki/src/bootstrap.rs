//! One-time construction of the root → intermediate → OCSP hierarchy.
//!
//! The [`Orchestrator`] runs every stage strictly in sequence. A PKI that
//! already carries its readiness marker is refused before anything is
//! touched; a PKI left half-built by an interrupted run is reported as a
//! conflict and must be removed by the operator. Completed stages are never
//! rolled back.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::chain;
use crate::csr::{CertificateRequest, CertificateRequestBuilder};
use crate::error::{Error, Operation, Result, StageContext};
use crate::keygen::{self, KeyMaterial, MAX_KEY_BITS, MIN_KEY_BITS};
use crate::permissions::{self, PermissionPolicy, ProtectedPath};
use crate::policy::{self, SubjectPolicy};
use crate::signer::{self, ExtensionProfile, Issuer};
use crate::state::CaState;
use crate::store::StateStore;
use crate::types::{CaProfile, Certificate, Purpose, Role};
use crate::validation;

/// Smallest RSA modulus accepted for CA and responder keys.
pub const MIN_CA_KEY_BITS: usize = 4096;

/// Resolved input of a bootstrap run.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// PKI root directory.
    pub pki_dir: PathBuf,
    /// RSA modulus size of every generated key.
    pub key_bits: usize,
    /// Root CA profile.
    pub root: CaProfile,
    /// Intermediate CA profile, carrying the OCSP and CRL URLs it advertises.
    pub intermediate: CaProfile,
    /// OCSP responder profile.
    pub ocsp: CaProfile,
}

impl BootstrapConfig {
    /// Returns the profile of a role.
    #[must_use]
    pub const fn profile(&self, role: Role) -> &CaProfile {
        match role {
            Role::Root => &self.root,
            Role::Intermediate => &self.intermediate,
            Role::Ocsp => &self.ocsp,
        }
    }

    /// Checks everything that can be checked before touching the disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the dotted path of the first
    /// missing or invalid value.
    pub fn validate(&self) -> Result<()> {
        self.validate_with_key_floor(MIN_CA_KEY_BITS)
    }

    /// Like [`validate`](Self::validate), with `key_floor` in place of
    /// [`MIN_CA_KEY_BITS`]. The floor never drops below
    /// [`keygen::MIN_KEY_BITS`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the dotted path of the first
    /// missing or invalid value.
    pub fn validate_with_key_floor(&self, key_floor: usize) -> Result<()> {
        let key_floor = key_floor.max(MIN_KEY_BITS);
        if !(key_floor..=MAX_KEY_BITS).contains(&self.key_bits) {
            return Err(configuration(
                "key_bits".into(),
                format!("must be between {key_floor} and {MAX_KEY_BITS}, got {}", self.key_bits),
            ));
        }
        let max_days = signer::max_validity_days();
        for role in Role::ALL {
            let prefix = config_prefix(role);
            let profile = self.profile(role);
            profile.subject.validate().map_err(|e| match e {
                Error::ProfileValidation { field, reason } => {
                    configuration(format!("{prefix}.{}", config_key(field)), reason)
                }
                other => other,
            })?;
            if profile.days <= 0 {
                return Err(configuration(
                    format!("{prefix}.days"),
                    format!("must be positive, got {}", profile.days),
                ));
            }
            if profile.days > max_days {
                return Err(configuration(
                    format!("{prefix}.days"),
                    format!("must end by 9999-12-31 (at most {max_days} days), got {}", profile.days),
                ));
            }
            if profile.passphrase.is_empty() {
                return Err(configuration(
                    format!("{prefix}.passphrase"),
                    "must not be empty".into(),
                ));
            }
        }
        SubjectPolicy::of(Role::Root)
            .check(&self.root.subject, &self.intermediate.subject)
            .map_err(|e| match e {
                Error::Configuration { field, reason } => configuration(
                    format!("{}.{}", config_prefix(Role::Intermediate), field),
                    reason,
                ),
                other => other,
            })
    }
}

fn configuration(field: String, reason: String) -> Error {
    Error::Configuration { field, reason }
}

const fn config_prefix(role: Role) -> &'static str {
    match role {
        Role::Root => "ca.root",
        Role::Intermediate => "ca.intermediate",
        Role::Ocsp => "ca.intermediate.ocsp",
    }
}

fn config_key(field: &str) -> &str {
    if field == "common_name" { "commonname" } else { field }
}

/// Progress of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    /// Nothing has been written yet.
    NotStarted,
    /// Root key and self-signed certificate exist.
    RootCreated,
    /// Intermediate certificate and chain bundle exist.
    IntermediateCreated,
    /// OCSP responder certificate exists.
    OcspCreated,
    /// Final file modes are applied and verified.
    PermissionsApplied,
    /// The readiness marker is written.
    Ready,
    /// A stage failed; completed stages stay on disk.
    Aborted(String),
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::RootCreated => f.write_str("root created"),
            Self::IntermediateCreated => f.write_str("intermediate created"),
            Self::OcspCreated => f.write_str("ocsp created"),
            Self::PermissionsApplied => f.write_str("permissions applied"),
            Self::Ready => f.write_str("ready"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Summary of one issued certificate.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCertificate {
    /// The role the certificate belongs to.
    pub role: Role,
    /// Subject common name.
    pub subject: String,
    /// Issuer common name.
    pub issuer: String,
    /// Serial in upper-case hex.
    pub serial: String,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// Where the certificate was written.
    pub path: PathBuf,
}

/// Outcome of a successful bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    /// PKI root directory.
    pub pki_dir: PathBuf,
    /// Every state the run passed through, in order.
    pub transitions: Vec<BootstrapState>,
    /// Root, intermediate and OCSP certificates.
    pub certificates: Vec<IssuedCertificate>,
    /// Chain bundle location.
    pub chain: PathBuf,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the readiness marker was written.
    pub completed_at: DateTime<Utc>,
}

/// Builds a PKI from a [`BootstrapConfig`].
#[derive(Debug)]
pub struct Orchestrator {
    config: BootstrapConfig,
    store: StateStore,
    state: BootstrapState,
    transitions: Vec<BootstrapState>,
    key_floor: usize,
}

impl Orchestrator {
    /// Creates an orchestrator writing to the local filesystem.
    #[must_use]
    pub fn new(config: BootstrapConfig) -> Self {
        let store = StateStore::local(config.pki_dir.clone());
        Self::with_store(config, store)
    }

    /// Creates an orchestrator writing through `store`.
    #[must_use]
    pub fn with_store(config: BootstrapConfig, store: StateStore) -> Self {
        Self {
            config,
            store,
            state: BootstrapState::NotStarted,
            transitions: vec![BootstrapState::NotStarted],
            key_floor: MIN_CA_KEY_BITS,
        }
    }

    /// Accepts CA keys smaller than [`MIN_CA_KEY_BITS`], down to `bits`.
    ///
    /// Meant for test suites that cannot afford 4096-bit key generation.
    /// Key generation itself still refuses anything below
    /// [`keygen::MIN_KEY_BITS`].
    #[must_use]
    pub fn with_key_floor(mut self, bits: usize) -> Self {
        self.key_floor = bits;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> &BootstrapState {
        &self.state
    }

    /// Returns the store the orchestrator writes through.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Runs the bootstrap.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if the configuration is invalid; nothing
    ///   is written.
    /// - [`Error::AlreadyExists`] if the PKI is already built; nothing is
    ///   written.
    /// - [`Error::PartialState`] if an earlier run left a partial PKI.
    /// - [`Error::Locked`] if another run is in progress.
    /// - Any stage failure wrapped in [`Error::Stage`].
    pub fn run(&mut self) -> Result<BootstrapReport> {
        if self.state != BootstrapState::NotStarted {
            return Err(Error::Validation(format!(
                "orchestrator already ran and is {}",
                self.state
            )));
        }
        self.config.validate_with_key_floor(self.key_floor)?;
        self.guard()?;

        let _lock = self.store.lock()?;
        // Another run may have finished while we waited for the lock.
        self.guard()?;

        info!(pki_dir = %self.config.pki_dir.display(), key_bits = self.config.key_bits, "bootstrapping PKI");
        match self.build() {
            Ok(report) => {
                info!(pki_dir = %report.pki_dir.display(), "PKI is ready");
                Ok(report)
            }
            Err(e) => {
                error!(state = %self.state, error = %e, "bootstrap aborted");
                self.transition(BootstrapState::Aborted(e.to_string()));
                Err(e)
            }
        }
    }

    fn guard(&self) -> Result<()> {
        if self.store.is_ready() {
            warn!(pki_dir = %self.config.pki_dir.display(), "PKI already exists, nothing to do");
            return Err(Error::AlreadyExists(self.config.pki_dir.clone()));
        }
        if self.store.exists() {
            warn!(pki_dir = %self.config.pki_dir.display(), "found partial PKI");
            return Err(Error::PartialState(self.config.pki_dir.clone()));
        }
        Ok(())
    }

    fn transition(&mut self, next: BootstrapState) {
        debug!(from = %self.state, to = %next, "bootstrap transition");
        self.state = next.clone();
        self.transitions.push(next);
    }

    fn build(&mut self) -> Result<BootstrapReport> {
        let started_at = Utc::now();
        let layout = self.store.layout().clone();

        let root_state = self
            .store
            .initialize(Role::Root)
            .at(Role::Root, Operation::InitializeState)?;
        let intermediate_state = self
            .store
            .initialize(Role::Intermediate)
            .at(Role::Intermediate, Operation::InitializeState)?;
        self.store
            .ensure_dir(&layout.role_dir(Role::Ocsp))
            .at(Role::Ocsp, Operation::InitializeState)?;
        for role in Role::ALL {
            self.write_policy(role)?;
        }

        // Root
        let root_key = self.generate_key(Role::Root)?;
        let root_cert =
            signer::self_sign(&root_key, &self.config.root).at(Role::Root, Operation::Sign)?;
        self.write_certificate(Role::Root, &root_cert)?;
        self.transition(BootstrapState::RootCreated);

        // Intermediate
        let intermediate_key = self.generate_key(Role::Intermediate)?;
        let request = self.build_request(Role::Intermediate, &intermediate_key)?;
        let root_issuer = Issuer::new(Role::Root, root_cert.clone(), root_key);
        let intermediate_cert = self.sign(
            Role::Intermediate,
            request,
            &root_issuer,
            &root_state,
            ExtensionProfile::V3IntermediateCa,
        )?;
        let bundle = chain::assemble(&[intermediate_cert.clone(), root_cert.clone()])
            .at(Role::Intermediate, Operation::AssembleChain)?;
        self.store
            .write_artifact(
                &layout.chain(),
                bundle.as_str().as_bytes(),
                PermissionPolicy::PublicCertificate,
            )
            .at(Role::Intermediate, Operation::WriteArtifact)?;
        self.transition(BootstrapState::IntermediateCreated);

        // OCSP responder
        let ocsp_key = self.generate_key(Role::Ocsp)?;
        let request = self.build_request(Role::Ocsp, &ocsp_key)?;
        let intermediate_issuer =
            Issuer::new(Role::Intermediate, intermediate_cert.clone(), intermediate_key)
                .with_crl_url(self.config.intermediate.crl_url.clone());
        let ocsp_cert = self.sign(
            Role::Ocsp,
            request,
            &intermediate_issuer,
            &intermediate_state,
            ExtensionProfile::Ocsp,
        )?;
        self.transition(BootstrapState::OcspCreated);

        self.verify(&ocsp_cert, &intermediate_cert, &root_cert)?;

        for role in Role::ALL {
            permissions::apply(self.store.fs(), &self.protected_paths(role))
                .at(role, Operation::ApplyPermissions)?;
        }
        self.transition(BootstrapState::PermissionsApplied);

        let marker = self
            .store
            .mark_ready()
            .at(Role::Root, Operation::MarkReady)?;
        self.transition(BootstrapState::Ready);

        let certificates = [
            (Role::Root, &root_cert),
            (Role::Intermediate, &intermediate_cert),
            (Role::Ocsp, &ocsp_cert),
        ]
        .into_iter()
        .map(|(role, cert)| IssuedCertificate {
            role,
            subject: cert.subject().common_name.clone(),
            issuer: cert.issuer().to_string(),
            serial: cert.serial_hex(),
            not_after: cert.not_after(),
            path: layout.certificate(role),
        })
        .collect();

        Ok(BootstrapReport {
            pki_dir: self.config.pki_dir.clone(),
            transitions: self.transitions.clone(),
            certificates,
            chain: layout.chain(),
            started_at,
            completed_at: marker.created_at,
        })
    }

    fn write_policy(&self, role: Role) -> Result<()> {
        let layout = self.store.layout();
        let text = policy::render(
            role,
            self.config.profile(role),
            &layout.role_dir(role),
            self.config.key_bits,
        );
        self.store
            .write_artifact(&layout.policy(role), text.as_bytes(), PermissionPolicy::PolicyConfig)
            .at(role, Operation::WritePolicy)
    }

    fn generate_key(&self, role: Role) -> Result<KeyMaterial> {
        let passphrase = &self.config.profile(role).passphrase;
        info!(%role, bits = self.config.key_bits, "generating key");
        let key = keygen::generate(self.config.key_bits, passphrase)
            .at(role, Operation::GenerateKey)?;
        let pem = key
            .to_encrypted_pem(passphrase)
            .at(role, Operation::GenerateKey)?;
        self.store
            .write_artifact(
                &self.store.layout().key(role),
                pem.as_bytes(),
                PermissionPolicy::PrivateKey,
            )
            .at(role, Operation::WriteArtifact)?;
        Ok(key)
    }

    fn build_request(&self, role: Role, key: &KeyMaterial) -> Result<CertificateRequest> {
        let request = CertificateRequestBuilder
            .build(key, self.config.profile(role), Purpose::for_role(role))
            .at(role, Operation::BuildRequest)?;
        self.store
            .write_artifact(
                &self.store.layout().request(role),
                request.pem().as_bytes(),
                PermissionPolicy::Transient,
            )
            .at(role, Operation::WriteArtifact)?;
        Ok(request)
    }

    /// Signs `role`'s request, records the issuance with the issuer and
    /// writes the certificate. The request file is removed afterwards.
    fn sign(
        &self,
        role: Role,
        request: CertificateRequest,
        issuer: &Issuer,
        issuer_state: &CaState,
        profile: ExtensionProfile,
    ) -> Result<Certificate> {
        let issuer_role = issuer.role();
        if issuer_role != role.issuer() {
            return Err::<Certificate, _>(Error::IssuerKeyMismatch(format!(
                "{role} certificates are issued by the {} CA, not the {issuer_role} CA",
                role.issuer()
            )))
            .at(role, Operation::Sign);
        }
        SubjectPolicy::of(issuer_role)
            .check(issuer.certificate().subject(), request.subject())
            .at(role, Operation::Sign)?;

        let serial = issuer_state.serial;
        let (certificate, updated) = signer::sign(
            request,
            issuer,
            issuer_state,
            profile,
            self.config.profile(role).days,
        )
        .at(role, Operation::Sign)?;

        let layout = self.store.layout();
        self.store
            .write_artifact(
                &layout.issued(issuer_role, serial),
                certificate.pem().as_bytes(),
                PermissionPolicy::PublicCertificate,
            )
            .at(role, Operation::WriteArtifact)?;
        self.store
            .commit(issuer_role, &updated)
            .at(issuer_role, Operation::CommitState)?;
        self.write_certificate(role, &certificate)?;
        self.store
            .remove_artifact(&layout.request(role))
            .at(role, Operation::WriteArtifact)?;
        Ok(certificate)
    }

    fn write_certificate(&self, role: Role, certificate: &Certificate) -> Result<()> {
        self.store
            .write_artifact(
                &self.store.layout().certificate(role),
                certificate.pem().as_bytes(),
                PermissionPolicy::PublicCertificate,
            )
            .at(role, Operation::WriteArtifact)
    }

    /// Re-reads the written chain and checks the whole hierarchy.
    fn verify(&self, ocsp: &Certificate, intermediate: &Certificate, root: &Certificate) -> Result<()> {
        let layout = self.store.layout();
        let bytes = self
            .store
            .read_artifact(&layout.chain())
            .at(Role::Intermediate, Operation::Verify)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::Parse(format!("chain bundle is not UTF-8: {e}")))
            .at(Role::Intermediate, Operation::Verify)?;
        let pems = chain::split_pems(&text);
        if pems != [intermediate.pem(), root.pem()] {
            return Err::<(), _>(Error::Validation(
                "chain bundle does not hold the intermediate and root certificates".into(),
            ))
            .at(Role::Intermediate, Operation::Verify);
        }

        validation::validate_chain(&[ocsp.clone(), intermediate.clone(), root.clone()])
            .at(Role::Ocsp, Operation::Verify)?;
        if root.path_len().is_some() || intermediate.path_len() != Some(0) {
            return Err::<(), _>(Error::Validation("unexpected path length constraints".into()))
                .at(Role::Intermediate, Operation::Verify);
        }
        if ocsp.is_ca() || !ocsp.is_ocsp_signer() {
            return Err::<(), _>(Error::Validation(
                "responder certificate must be a non-CA OCSP signer".into(),
            ))
            .at(Role::Ocsp, Operation::Verify);
        }
        debug!("hierarchy verified");
        Ok(())
    }

    fn protected_paths(&self, role: Role) -> Vec<ProtectedPath> {
        let layout = self.store.layout();
        let mut paths = vec![
            ProtectedPath::new(layout.key(role), PermissionPolicy::PrivateKey),
            ProtectedPath::new(layout.policy(role), PermissionPolicy::PolicyConfig),
            ProtectedPath::new(layout.certificate(role), PermissionPolicy::PublicCertificate),
        ];
        match role {
            Role::Root => paths.push(ProtectedPath::new(
                layout.issued(Role::Root, crate::state::INITIAL_SERIAL),
                PermissionPolicy::PublicCertificate,
            )),
            Role::Intermediate => {
                paths.push(ProtectedPath::new(layout.chain(), PermissionPolicy::PublicCertificate));
                paths.push(ProtectedPath::new(
                    layout.issued(Role::Intermediate, crate::state::INITIAL_SERIAL),
                    PermissionPolicy::PublicCertificate,
                ));
            }
            Role::Ocsp => {}
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::profile;

    fn config(dir: &std::path::Path) -> BootstrapConfig {
        BootstrapConfig {
            pki_dir: dir.join("mypki"),
            key_bits: MIN_CA_KEY_BITS,
            root: profile("Root CA", 7300),
            intermediate: profile("Intermediate CA", 3650)
                .with_ocsp_url("http://ocsp.example.com")
                .with_crl_url("http://example.com/intermediate.crl.pem"),
            ocsp: profile("ocsp.example.com", 3650),
        }
    }

    fn snapshot(dir: &std::path::Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(next) = stack.pop() {
            for entry in std::fs::read_dir(&next).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path.clone());
                }
                out.push(path);
            }
        }
        out.sort();
        out
    }

    #[test]
    fn valid_config_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        config(dir.path()).validate().unwrap();
    }

    #[test]
    fn missing_subject_field_is_reported_by_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(dir.path());
        cfg.ocsp.subject.common_name.clear();

        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration { ref field, .. } if field == "ca.intermediate.ocsp.commonname"
        ));
    }

    #[test]
    fn key_size_and_days_are_checked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(dir.path());
        cfg.key_bits = 1024;
        assert!(matches!(cfg.validate(), Err(Error::Configuration { field, .. }) if field == "key_bits"));

        let mut cfg = config(dir.path());
        cfg.intermediate.days = 0;
        assert!(matches!(
            cfg.validate(),
            Err(Error::Configuration { field, .. }) if field == "ca.intermediate.days"
        ));
    }

    #[test]
    fn ca_keys_below_4096_bits_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(dir.path());
        cfg.key_bits = 2048;

        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { ref field, .. } if field == "key_bits"), "{err}");
        cfg.validate_with_key_floor(2048).unwrap();

        // The floor cannot go below what key generation accepts.
        cfg.key_bits = 1024;
        assert!(cfg.validate_with_key_floor(512).is_err());
    }

    #[test]
    fn weak_keys_are_refused_before_anything_is_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(dir.path());
        cfg.key_bits = 3072;

        let err = Orchestrator::new(cfg).run().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn validity_past_year_9999_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(dir.path());
        cfg.root.days = 3_000_000;

        let err = Orchestrator::new(cfg).run().unwrap_err();
        assert!(matches!(err, Error::Configuration { ref field, .. } if field == "ca.root.days"), "{err}");
        assert!(snapshot(dir.path()).is_empty());

        let mut cfg = config(dir.path());
        cfg.ocsp.days = signer::max_validity_days() + 1;
        assert!(matches!(
            cfg.validate(),
            Err(Error::Configuration { field, .. }) if field == "ca.intermediate.ocsp.days"
        ));
        cfg.ocsp.days = signer::max_validity_days() - 1;
        cfg.validate().unwrap();
    }

    #[test]
    fn responder_is_only_signed_by_the_intermediate() {
        use crate::test_support::test_key;

        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Orchestrator::new(config(dir.path()));
        let root_cert = signer::self_sign(&test_key(0), &profile("Root CA", 30)).unwrap();
        let root = Issuer::new(Role::Root, root_cert, test_key(0));
        let request = CertificateRequestBuilder
            .build(&test_key(1), &profile("ocsp.example.com", 30), Purpose::OcspResponder)
            .unwrap();

        let err = orchestrator
            .sign(
                Role::Ocsp,
                request,
                &root,
                &CaState::new(Role::Root).unwrap(),
                ExtensionProfile::Ocsp,
            )
            .unwrap_err();
        assert!(matches!(err.root_cause(), Error::IssuerKeyMismatch(_)), "{err}");
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn intermediate_must_match_root_organization() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(dir.path());
        cfg.intermediate.subject.organization = "Elsewhere".into();
        assert!(matches!(
            cfg.validate(),
            Err(Error::Configuration { field, .. }) if field == "ca.intermediate.organization"
        ));
    }

    #[test]
    fn invalid_config_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(dir.path());
        cfg.root.passphrase = crate::types::Passphrase::new("");

        let err = Orchestrator::new(cfg).run().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn ready_pki_is_refused_without_side_effects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path());
        let store = StateStore::local(cfg.pki_dir.clone());
        store.ensure_dir(&cfg.pki_dir).unwrap();
        store.mark_ready().unwrap();
        let before = snapshot(dir.path());

        let mut orchestrator = Orchestrator::new(cfg);
        let err = orchestrator.run().unwrap_err();

        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(err.is_refusal());
        assert_eq!(snapshot(dir.path()), before);
        assert_eq!(orchestrator.state(), &BootstrapState::NotStarted);
    }

    #[test]
    fn partial_pki_is_a_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path());
        StateStore::local(cfg.pki_dir.clone())
            .initialize(Role::Root)
            .unwrap();

        let err = Orchestrator::new(cfg).run().unwrap_err();
        assert!(matches!(err, Error::PartialState(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn held_lock_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path());
        let store = StateStore::local(cfg.pki_dir.clone());
        let _held = store.lock().unwrap();

        let err = Orchestrator::new(cfg).run().unwrap_err();
        assert!(matches!(err, Error::Locked(_)));
        assert!(!store.exists());
    }
}
