//! Filesystem capability used by the state store and the orchestrator.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::permissions::PermissionPolicy;

/// Filesystem operations the PKI needs.
///
/// All mutations go through this trait so a run can be observed or faked.
pub trait Filesystem: Send + Sync {
    /// Returns `true` if `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Creates `path` and its parents if absent.
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    /// Reads a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Creates or truncates a file, written with the policy's initial mode,
    /// and syncs it to disk.
    fn write(&self, path: &Path, contents: &[u8], policy: PermissionPolicy) -> io::Result<()>;

    /// Creates a file that must not exist yet.
    fn create_exclusive(&self, path: &Path, contents: &[u8], policy: PermissionPolicy)
    -> io::Result<()>;

    /// Removes a file.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Atomically renames `from` over `to`.
    fn replace(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Sets the permission bits of `path`.
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Returns the permission bits of `path`.
    fn mode(&self, path: &Path) -> io::Result<u32>;
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    fn open(path: &Path, policy: PermissionPolicy, create_new: bool) -> io::Result<fs::File> {
        let mut options = fs::OpenOptions::new();
        options.write(true);
        if create_new {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(policy.initial_mode());
        }
        #[cfg(not(unix))]
        let _ = policy;
        options.open(path)
    }
}

impl Filesystem for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8], policy: PermissionPolicy) -> io::Result<()> {
        let mut file = Self::open(path, policy, false)?;
        file.write_all(contents)?;
        file.sync_all()?;
        // The open mode only applies to new files.
        self.set_mode(path, policy.initial_mode())
    }

    fn create_exclusive(
        &self,
        path: &Path,
        contents: &[u8],
        policy: PermissionPolicy,
    ) -> io::Result<()> {
        let mut file = Self::open(path, policy, true)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)?;
        if let Some(parent) = to.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
        }
        #[cfg(not(unix))]
        {
            let mut permissions = fs::metadata(path)?.permissions();
            permissions.set_readonly(mode & 0o222 == 0);
            fs::set_permissions(path, permissions)
        }
    }

    fn mode(&self, path: &Path) -> io::Result<u32> {
        let metadata = fs::metadata(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Ok(metadata.permissions().mode())
        }
        #[cfg(not(unix))]
        {
            Ok(if metadata.permissions().readonly() { 0o444 } else { 0o666 })
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
