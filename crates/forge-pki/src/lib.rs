//! Two-tier PKI bootstrap for pkiforge.
//!
//! Builds a self-signed root CA, an intermediate CA signed by the root and an
//! OCSP responder certificate signed by the intermediate, keeping each CA's
//! serial counter, issuance ledger and CRL number on disk in a layout that
//! stock OpenSSL tooling can keep operating.
//!
//! # Example
//!
//! ```no_run
//! use forge_pki::{BootstrapConfig, CaProfile, Orchestrator, Passphrase, SubjectName};
//!
//! let subject = |cn: &str| SubjectName {
//!     country: "DE".into(),
//!     state: "Berlin".into(),
//!     locality: "Berlin".into(),
//!     organization: "Example".into(),
//!     common_name: cn.into(),
//! };
//!
//! let config = BootstrapConfig {
//!     pki_dir: "mypki".into(),
//!     key_bits: 4096,
//!     root: CaProfile::new(subject("Example Root CA"), 7300, Passphrase::new("root-secret")),
//!     intermediate: CaProfile::new(subject("Example Intermediate CA"), 3650, Passphrase::new("int-secret"))
//!         .with_ocsp_url("http://ocsp.example.com")
//!         .with_crl_url("http://example.com/intermediate.crl.pem"),
//!     ocsp: CaProfile::new(subject("ocsp.example.com"), 3650, Passphrase::new("ocsp-secret")),
//! };
//!
//! match Orchestrator::new(config).run() {
//!     Ok(report) => println!("PKI ready at {}", report.pki_dir.display()),
//!     Err(e) if e.is_refusal() => println!("PKI already exists"),
//!     Err(e) => eprintln!("{}: {e}", e.kind()),
//! }
//! ```
//!
//! # Modules
//!
//! - [`keygen`] - RSA key generation and encryption at rest
//! - [`csr`] - Certificate signing requests
//! - [`signer`] - Root self-signing and CA signing
//! - [`chain`] - Chain bundle assembly
//! - [`store`] - On-disk layout, CA state, run lock and readiness marker
//! - [`policy`] - `openssl.cnf` rendering and subject policy
//! - [`permissions`] - File permission policy
//! - [`bootstrap`] - The bootstrap orchestrator
//! - [`validation`] - Certificate and chain validation

#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod chain;
pub mod csr;
pub mod error;
pub mod fs;
pub mod keygen;
pub mod permissions;
pub mod policy;
pub mod signer;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use bootstrap::{
    BootstrapConfig, BootstrapReport, BootstrapState, IssuedCertificate, MIN_CA_KEY_BITS, Orchestrator,
};
pub use chain::{ChainBundle, assemble};
pub use csr::{CertificateRequest, CertificateRequestBuilder};
pub use error::{Error, ErrorKind, Operation, Result, Stage};
pub use fs::{Filesystem, LocalFs};
pub use keygen::{DEFAULT_KEY_BITS, KeyMaterial};
pub use permissions::{PermissionPolicy, ProtectedPath};
pub use signer::{ExtensionProfile, Issuer, self_sign, sign};
pub use state::{CaState, CertStatus, IssuanceRecord, INITIAL_SERIAL};
pub use store::{Layout, LockGuard, ReadinessMarker, StateStore};
pub use types::{CaProfile, Certificate, Passphrase, Purpose, Role, SubjectName};
pub use validation::{is_expired, is_valid_now, remaining_validity, validate_certificate, validate_chain};
