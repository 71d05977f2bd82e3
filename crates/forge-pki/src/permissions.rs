//! File permission policy per artifact class.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fs::Filesystem;

/// Protection class of a persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Encrypted private keys: owner read-only once the PKI is built.
    PrivateKey,
    /// Per-CA signing policy files: owner read-only once the PKI is built.
    PolicyConfig,
    /// Certificates and chain bundles: world-readable, never writable.
    PublicCertificate,
    /// CA bookkeeping that later signings rewrite: owner read-write.
    State,
    /// Short-lived files such as signing requests and temp files.
    Transient,
}

impl PermissionPolicy {
    /// Mode the artifact is created with.
    #[must_use]
    pub const fn initial_mode(self) -> u32 {
        match self {
            Self::PublicCertificate => 0o644,
            Self::PrivateKey | Self::PolicyConfig | Self::State | Self::Transient => 0o600,
        }
    }

    /// Mode the artifact carries once the bootstrap has finished.
    #[must_use]
    pub const fn final_mode(self) -> u32 {
        match self {
            Self::PrivateKey | Self::PolicyConfig => 0o400,
            Self::PublicCertificate => 0o444,
            Self::State | Self::Transient => 0o600,
        }
    }

    /// Returns `true` if `mode` satisfies the final policy.
    #[must_use]
    pub const fn is_satisfied_by(self, mode: u32) -> bool {
        if cfg!(unix) {
            mode & 0o777 == self.final_mode()
        } else {
            // Only the read-only flag exists off Unix.
            (mode & 0o222 == 0) == (self.final_mode() & 0o222 == 0)
        }
    }
}

/// An artifact and the policy protecting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPath {
    /// Artifact location.
    pub path: PathBuf,
    /// Protection class.
    pub policy: PermissionPolicy,
}

impl ProtectedPath {
    /// Pairs a path with its policy.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, policy: PermissionPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }
}

/// Applies the final mode to every artifact and reads it back.
///
/// # Errors
///
/// Returns [`Error::PermissionApplication`] for the first artifact whose mode
/// cannot be set or does not read back as required.
pub fn apply(fs: &dyn Filesystem, artifacts: &[ProtectedPath]) -> Result<()> {
    for artifact in artifacts {
        let mode = artifact.policy.final_mode();
        fs.set_mode(&artifact.path, mode)
            .map_err(|e| permission_error(&artifact.path, format!("chmod {mode:o} failed: {e}")))?;
        verify(fs, artifact)?;
        debug!(path = %artifact.path.display(), mode = format!("{mode:o}"), "permissions applied");
    }
    Ok(())
}

/// Checks that an artifact carries its final mode.
///
/// # Errors
///
/// Returns [`Error::PermissionApplication`] on mismatch.
pub fn verify(fs: &dyn Filesystem, artifact: &ProtectedPath) -> Result<()> {
    let actual = fs
        .mode(&artifact.path)
        .map_err(|e| permission_error(&artifact.path, format!("cannot read mode: {e}")))?;
    if !artifact.policy.is_satisfied_by(actual) {
        warn!(
            path = %artifact.path.display(),
            expected = format!("{:o}", artifact.policy.final_mode()),
            actual = format!("{:o}", actual & 0o777),
            "artifact has wrong permissions"
        );
        return Err(permission_error(
            &artifact.path,
            format!(
                "mode is {:o}, expected {:o}",
                actual & 0o777,
                artifact.policy.final_mode()
            ),
        ));
    }
    Ok(())
}

fn permission_error(path: &Path, reason: String) -> Error {
    Error::PermissionApplication {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::fs::LocalFs;

    #[test]
    fn modes_per_class() {
        assert_eq!(PermissionPolicy::PrivateKey.final_mode(), 0o400);
        assert_eq!(PermissionPolicy::PolicyConfig.final_mode(), 0o400);
        assert_eq!(PermissionPolicy::PublicCertificate.final_mode(), 0o444);
        assert_eq!(PermissionPolicy::PrivateKey.initial_mode(), 0o600);
    }

    #[test]
    fn apply_sets_and_verifies_modes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFs;
        let key = dir.path().join("root.key.pem");
        let cert = dir.path().join("root.cert.pem");
        fs.write(&key, b"key", PermissionPolicy::PrivateKey).unwrap();
        fs.write(&cert, b"cert", PermissionPolicy::PublicCertificate).unwrap();

        apply(
            &fs,
            &[
                ProtectedPath::new(&key, PermissionPolicy::PrivateKey),
                ProtectedPath::new(&cert, PermissionPolicy::PublicCertificate),
            ],
        )
        .unwrap();

        assert_eq!(fs.mode(&key).unwrap() & 0o777, 0o400);
        assert_eq!(fs.mode(&cert).unwrap() & 0o777, 0o444);
    }

    #[test]
    fn loose_key_fails_verification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFs;
        let key = dir.path().join("leaky.key.pem");
        fs.write(&key, b"key", PermissionPolicy::PublicCertificate).unwrap();

        let err = verify(&fs, &ProtectedPath::new(&key, PermissionPolicy::PrivateKey)).unwrap_err();
        assert!(matches!(err, Error::PermissionApplication { .. }));
    }

    #[test]
    fn missing_artifact_is_a_permission_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = apply(
            &LocalFs,
            &[ProtectedPath::new(
                dir.path().join("absent.pem"),
                PermissionPolicy::PrivateKey,
            )],
        )
        .unwrap_err();
        assert!(matches!(err, Error::PermissionApplication { .. }));
    }
}
