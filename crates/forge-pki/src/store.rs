//! On-disk PKI layout and CA state persistence.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fs::{Filesystem, LocalFs};
use crate::permissions::PermissionPolicy;
use crate::state::{CaState, hex_serial};
use crate::types::Role;

const STATE_FILE: &str = "state.json";
const MARKER_FILE: &str = "created";
const LOCK_FILE: &str = ".lock";
const CHAIN_FILE: &str = "ca-chain.cert.pem";
const TEMP_SUFFIX: &str = ".tmp";

/// Paths of every artifact under a PKI root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Creates the layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The PKI root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a role.
    #[must_use]
    pub fn role_dir(&self, role: Role) -> PathBuf {
        self.root.join(role.dir())
    }

    /// Encrypted private key of a role.
    #[must_use]
    pub fn key(&self, role: Role) -> PathBuf {
        self.role_file(role, "key.pem")
    }

    /// Certificate of a role.
    #[must_use]
    pub fn certificate(&self, role: Role) -> PathBuf {
        self.role_file(role, "cert.pem")
    }

    /// Transient signing request of a role.
    #[must_use]
    pub fn request(&self, role: Role) -> PathBuf {
        self.role_file(role, "csr.pem")
    }

    /// `openssl.cnf` of a role.
    #[must_use]
    pub fn policy(&self, role: Role) -> PathBuf {
        self.role_dir(role).join("openssl.cnf")
    }

    /// Persisted state of a CA.
    #[must_use]
    pub fn state(&self, role: Role) -> PathBuf {
        self.role_dir(role).join(STATE_FILE)
    }

    /// OpenSSL serial file of a CA.
    #[must_use]
    pub fn serial(&self, role: Role) -> PathBuf {
        self.role_dir(role).join("serial")
    }

    /// OpenSSL database of a CA.
    #[must_use]
    pub fn index(&self, role: Role) -> PathBuf {
        self.role_dir(role).join("index.txt")
    }

    /// CRL number file of a CA.
    #[must_use]
    pub fn crl_number(&self, role: Role) -> PathBuf {
        self.role_dir(role).join("crlnumber")
    }

    /// Directory holding copies of the certificates a CA issued.
    #[must_use]
    pub fn issued_dir(&self, role: Role) -> PathBuf {
        self.role_dir(role).join("certs")
    }

    /// Copy of the certificate a CA issued under `serial`.
    #[must_use]
    pub fn issued(&self, role: Role, serial: u64) -> PathBuf {
        self.issued_dir(role).join(format!("{}.pem", hex_serial(serial)))
    }

    /// Directory for the CRLs of a CA.
    #[must_use]
    pub fn crl_dir(&self, role: Role) -> PathBuf {
        self.role_dir(role).join("crl")
    }

    /// Intermediate plus root chain bundle.
    #[must_use]
    pub fn chain(&self) -> PathBuf {
        self.role_dir(Role::Intermediate).join(CHAIN_FILE)
    }

    /// Readiness marker.
    #[must_use]
    pub fn marker(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    /// Run lock.
    #[must_use]
    pub fn lock(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    fn role_file(&self, role: Role, suffix: &str) -> PathBuf {
        self.role_dir(role)
            .join(format!("{}.{suffix}", role.file_stem()))
    }
}

/// Body of the readiness marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessMarker {
    /// When the bootstrap completed.
    pub created_at: DateTime<Utc>,
}

/// Persists CA state and the PKI's run lock and readiness marker.
#[derive(Clone)]
pub struct StateStore {
    layout: Layout,
    fs: Arc<dyn Filesystem>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("root", &self.layout.root)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a store over `root` backed by `fs`.
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn Filesystem>) -> Self {
        Self {
            layout: Layout::new(root),
            fs,
        }
    }

    /// Creates a store over `root` on the local filesystem.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(LocalFs))
    }

    /// Returns the artifact layout.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the filesystem the store writes through.
    #[must_use]
    pub fn fs(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    /// Returns `true` if state for any CA exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        [Role::Root, Role::Intermediate]
            .into_iter()
            .any(|role| self.fs.exists(&self.layout.state(role)))
    }

    /// Returns `true` if the readiness marker exists.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.fs.exists(&self.layout.marker())
    }

    /// Reads the readiness marker, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be read or parsed.
    pub fn readiness(&self) -> Result<Option<ReadinessMarker>> {
        let path = self.layout.marker();
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let bytes = self.fs.read(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Creates the directories and initial state of a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotACertificateAuthority`] for the OCSP responder,
    /// [`Error::AlreadyInitialized`] if state already exists, or an I/O
    /// error.
    pub fn initialize(&self, role: Role) -> Result<CaState> {
        let state = CaState::new(role)?;
        if self.fs.exists(&self.layout.state(role)) {
            return Err(Error::AlreadyInitialized(role));
        }
        for dir in [self.layout.issued_dir(role), self.layout.crl_dir(role)] {
            self.fs.ensure_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        self.commit(role, &state)?;
        info!(%role, serial = state.serial, "initialized CA state");
        Ok(state)
    }

    /// Loads the persisted state of a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if no state exists, or an error if
    /// it cannot be read or parsed.
    pub fn load(&self, role: Role) -> Result<CaState> {
        if !role.is_ca() {
            return Err(Error::NotACertificateAuthority(role));
        }
        let path = self.layout.state(role);
        if !self.fs.exists(&path) {
            return Err(Error::NotInitialized(role));
        }
        let bytes = self.fs.read(&path).map_err(|e| Error::io(&path, e))?;
        let state: CaState = serde_json::from_slice(&bytes)?;
        if state.role != role {
            return Err(Error::Validation(format!(
                "{} holds state of the {} CA",
                path.display(),
                state.role
            )));
        }
        Ok(state)
    }

    /// Atomically replaces the state of a CA and regenerates its OpenSSL
    /// bookkeeping files.
    ///
    /// On failure the previously committed `state.json` is left intact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `state` belongs to another role, or
    /// an error if serialization or I/O fails.
    pub fn commit(&self, role: Role, state: &CaState) -> Result<()> {
        if state.role != role {
            return Err(Error::Validation(format!(
                "cannot commit {} state as the {role} CA",
                state.role
            )));
        }
        let json = serde_json::to_vec_pretty(state)?;
        self.write_atomic(&self.layout.state(role), &json, PermissionPolicy::State)?;

        self.write_atomic(
            &self.layout.serial(role),
            state.openssl_serial().as_bytes(),
            PermissionPolicy::State,
        )?;
        self.write_atomic(
            &self.layout.index(role),
            state.openssl_index().as_bytes(),
            PermissionPolicy::State,
        )?;
        if let Some(crl_number) = state.openssl_crl_number() {
            self.write_atomic(
                &self.layout.crl_number(role),
                crl_number.as_bytes(),
                PermissionPolicy::State,
            )?;
        }
        debug!(%role, serial = state.serial, entries = state.ledger.len(), "committed CA state");
        Ok(())
    }

    /// Writes the readiness marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the marker is already present, or
    /// an I/O error.
    pub fn mark_ready(&self) -> Result<ReadinessMarker> {
        let path = self.layout.marker();
        let marker = ReadinessMarker {
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&marker)?;
        self.fs
            .create_exclusive(&path, &json, PermissionPolicy::State)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(self.layout.root.clone()),
                _ => Error::io(&path, e),
            })?;
        info!(path = %path.display(), "PKI marked ready");
        Ok(marker)
    }

    /// Takes the exclusive run lock, creating the PKI root if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] if another run holds the lock, or an I/O
    /// error.
    pub fn lock(&self) -> Result<LockGuard> {
        let root = self.layout.root();
        self.fs.ensure_dir(root).map_err(|e| Error::io(root, e))?;

        let path = self.layout.lock();
        let owner = format!("pid {} at {}\n", std::process::id(), Utc::now().to_rfc3339());
        self.fs
            .create_exclusive(&path, owner.as_bytes(), PermissionPolicy::Transient)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    warn!(path = %path.display(), "PKI is locked by another run");
                    Error::Locked(path.clone())
                }
                _ => Error::io(&path, e),
            })?;
        debug!(path = %path.display(), "acquired run lock");
        Ok(LockGuard {
            fs: Arc::clone(&self.fs),
            path,
        })
    }

    /// Atomically writes an artifact with the policy's initial mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] naming the artifact.
    pub fn write_artifact(&self, path: &Path, contents: &[u8], policy: PermissionPolicy) -> Result<()> {
        self.write_atomic(path, contents, policy)?;
        debug!(path = %path.display(), ?policy, "wrote artifact");
        Ok(())
    }

    /// Reads an artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] naming the artifact.
    pub fn read_artifact(&self, path: &Path) -> Result<Vec<u8>> {
        self.fs.read(path).map_err(|e| Error::io(path, e))
    }

    /// Removes an artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] naming the artifact.
    pub fn remove_artifact(&self, path: &Path) -> Result<()> {
        self.fs.remove(path).map_err(|e| Error::io(path, e))?;
        debug!(path = %path.display(), "removed artifact");
        Ok(())
    }

    /// Creates a directory and its parents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] naming the directory.
    pub fn ensure_dir(&self, path: &Path) -> Result<()> {
        self.fs.ensure_dir(path).map_err(|e| Error::io(path, e))
    }

    fn write_atomic(&self, path: &Path, contents: &[u8], policy: PermissionPolicy) -> Result<()> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(TEMP_SUFFIX);
        let pending = PendingWrite {
            fs: self.fs.as_ref(),
            path: PathBuf::from(temp),
            armed: true,
        };

        self.fs
            .write(&pending.path, contents, policy)
            .map_err(|e| Error::io(&pending.path, e))?;
        self.fs
            .replace(&pending.path, path)
            .map_err(|e| Error::io(path, e))?;
        pending.disarm();
        Ok(())
    }
}

/// Removes a temp file unless the write it belongs to completed.
struct PendingWrite<'a> {
    fs: &'a dyn Filesystem,
    path: PathBuf,
    armed: bool,
}

impl PendingWrite<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        if self.armed && self.fs.exists(&self.path) {
            if let Err(e) = self.fs.remove(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

/// Exclusive run lock; released on drop.
pub struct LockGuard {
    fs: Arc<dyn Filesystem>,
    path: PathBuf,
}

impl LockGuard {
    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match self.fs.remove(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "released run lock"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to release run lock"),
        }
    }
}
