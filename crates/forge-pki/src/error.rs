//! PKI error types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::Role;

/// Result type for PKI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// PKI error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is missing or invalid.
    #[error("configuration error at `{field}`: {reason}")]
    Configuration {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// An encrypted private key could not be decrypted.
    #[error("private key decryption failed: {0}")]
    KeyDecryption(String),

    /// A subject field required by the profile is empty or malformed.
    #[error("profile validation failed: `{field}` {reason}")]
    ProfileValidation {
        /// Subject field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The issuer certificate, key and state do not belong together.
    #[error("issuer key mismatch: {0}")]
    IssuerKeyMismatch(String),

    /// The requested validity window is empty or negative.
    #[error("validity window of {days} days is already expired")]
    ExpiredValidityWindow {
        /// Requested validity in days.
        days: i64,
    },

    /// A chain was requested from zero certificates.
    #[error("cannot assemble a chain from zero certificates")]
    EmptyChain,

    /// The PKI has already been fully built.
    #[error("PKI already exists at {0}")]
    AlreadyExists(PathBuf),

    /// CA state for a role already exists.
    #[error("{0} CA state is already initialized")]
    AlreadyInitialized(Role),

    /// A previous bootstrap left a partial PKI behind.
    #[error("partial PKI found at {0}; remove it manually before bootstrapping again")]
    PartialState(PathBuf),

    /// Another bootstrap run holds the lock.
    #[error("PKI at {0} is locked by another run (remove the lock file if no run is active)")]
    Locked(PathBuf),

    /// The role does not keep CA state.
    #[error("{0} is not a certificate authority")]
    NotACertificateAuthority(Role),

    /// CA state for a role has not been initialized.
    #[error("{0} CA state is not initialized")]
    NotInitialized(Role),

    /// File permissions could not be applied or did not stick.
    #[error("failed to protect {path}: {reason}")]
    PermissionApplication {
        /// The artifact with wrong permissions.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Certificate or request signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Certificate parsing failed.
    #[error("certificate parsing failed: {0}")]
    Parse(String),

    /// Certificate validation failed.
    #[error("certificate validation failed: {0}")]
    Validation(String),

    /// State (de)serialization failed.
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A failure annotated with the bootstrap stage it happened in.
    #[error("{stage}: {source}")]
    Stage {
        /// Where the failure happened.
        stage: Stage,
        /// The original failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Builds an [`Error::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the innermost error, looking through stage annotations.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns the reporting category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root_cause() {
            Self::Configuration { .. } | Self::ProfileValidation { .. } => ErrorKind::Configuration,
            Self::KeyGeneration(_) | Self::KeyDecryption(_) => ErrorKind::KeyGeneration,
            Self::IssuerKeyMismatch(_) | Self::ExpiredValidityWindow { .. } | Self::Signing(_) => {
                ErrorKind::Signing
            }
            Self::AlreadyExists(_) | Self::AlreadyInitialized(_) => ErrorKind::Refusal,
            Self::PartialState(_) | Self::Locked(_) => ErrorKind::Conflict,
            Self::PermissionApplication { .. } => ErrorKind::Security,
            Self::EmptyChain | Self::Parse(_) | Self::Validation(_) => ErrorKind::Certificate,
            Self::NotACertificateAuthority(_)
            | Self::NotInitialized(_)
            | Self::Serialization(_)
            | Self::Io { .. } => ErrorKind::Storage,
            Self::Stage { .. } => ErrorKind::Storage,
        }
    }

    /// Returns `true` for guarded idempotent refusals, which are not failures.
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        self.kind() == ErrorKind::Refusal
    }
}

/// Reporting category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid configuration; nothing was written.
    Configuration,
    /// Key generation or decryption failed.
    KeyGeneration,
    /// Signing was refused or failed; no state was mutated.
    Signing,
    /// Idempotent refusal: the PKI or state already exists.
    Refusal,
    /// A partial PKI or a concurrent run is in the way.
    Conflict,
    /// Artifacts exist on disk with wrong protection.
    Security,
    /// Certificate parsing, chain or validation problem.
    Certificate,
    /// Persistence failure.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration error",
            Self::KeyGeneration => "key generation error",
            Self::Signing => "signing error",
            Self::Refusal => "already exists",
            Self::Conflict => "conflict",
            Self::Security => "security error",
            Self::Certificate => "certificate error",
            Self::Storage => "storage error",
        };
        f.write_str(name)
    }
}

/// The operation a bootstrap stage was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Creating directories and initial CA state.
    InitializeState,
    /// Rendering the signing policy file.
    WritePolicy,
    /// Generating a key pair.
    GenerateKey,
    /// Building a certificate signing request.
    BuildRequest,
    /// Signing a certificate.
    Sign,
    /// Writing a key, certificate or request to disk.
    WriteArtifact,
    /// Committing CA state.
    CommitState,
    /// Building the chain bundle.
    AssembleChain,
    /// Verifying the finished chain.
    Verify,
    /// Applying the file permission policy.
    ApplyPermissions,
    /// Writing the readiness marker.
    MarkReady,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitializeState => "initialize state",
            Self::WritePolicy => "write policy",
            Self::GenerateKey => "generate key",
            Self::BuildRequest => "build request",
            Self::Sign => "sign",
            Self::WriteArtifact => "write artifact",
            Self::CommitState => "commit state",
            Self::AssembleChain => "assemble chain",
            Self::Verify => "verify chain",
            Self::ApplyPermissions => "apply permissions",
            Self::MarkReady => "mark ready",
        };
        f.write_str(name)
    }
}

/// Role and operation a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stage {
    /// The role being built.
    pub role: Role,
    /// The operation that failed.
    pub operation: Operation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.operation)
    }
}

/// Attaches stage context to a result.
pub trait StageContext<T> {
    /// Wraps an error with the role and operation it happened in.
    fn at(self, role: Role, operation: Operation) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn at(self, role: Role, operation: Operation) -> Result<T> {
        self.map_err(|source| Error::Stage {
            stage: Stage { role, operation },
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_context_wraps_and_keeps_kind() {
        let result: Result<()> = Err(Error::ExpiredValidityWindow { days: 0 });
        let err = result.at(Role::Intermediate, Operation::Sign).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Signing);
        assert_eq!(
            err.to_string(),
            "intermediate sign: validity window of 0 days is already expired"
        );
        assert!(matches!(
            err.root_cause(),
            Error::ExpiredValidityWindow { days: 0 }
        ));
    }

    #[test]
    fn refusals_are_not_failures() {
        assert!(Error::AlreadyExists(PathBuf::from("mypki")).is_refusal());
        assert!(Error::AlreadyInitialized(Role::Root).is_refusal());
        assert!(!Error::PartialState(PathBuf::from("mypki")).is_refusal());
        assert!(!Error::EmptyChain.is_refusal());
    }

    #[test]
    fn nested_refusal_is_still_a_refusal() {
        let result: Result<()> = Err(Error::AlreadyInitialized(Role::Root));
        let err = result.at(Role::Root, Operation::InitializeState).unwrap_err();
        assert!(err.is_refusal());
    }

    #[test]
    fn permission_errors_are_security_relevant() {
        let err = Error::PermissionApplication {
            path: PathBuf::from("root/root.key.pem"),
            reason: "mode is 0644".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Security);
    }
}
