//! CLI error types.

use std::fmt;
use std::io;

use forge_config::ConfigError;
use forge_pki::ErrorKind;

/// Errors that can occur during CLI operations.
#[derive(Debug)]
pub enum CliError {
    /// Configuration file is missing or invalid.
    Config(ConfigError),
    /// A PKI operation failed.
    Pki(forge_pki::Error),
    /// Output formatting failed.
    Format(String),
    /// The blocking bootstrap task could not be joined.
    Task(String),
    /// I/O error.
    Io(io::Error),
}

impl CliError {
    /// Short category printed in front of the message.
    #[must_use]
    pub fn category(&self) -> String {
        match self {
            Self::Config(_) => "configuration error".to_string(),
            Self::Pki(e) => e.kind().to_string(),
            Self::Format(_) => "output error".to_string(),
            Self::Task(_) => "internal error".to_string(),
            Self::Io(_) => "i/o error".to_string(),
        }
    }

    /// Returns `true` if files may have been left with unsafe permissions.
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Pki(e) if e.kind() == ErrorKind::Security)
    }

    /// Process exit code for this error.
    ///
    /// `2` for configuration problems, `3` for conflicts with an existing
    /// PKI or a concurrent run, `4` for permission failures and `1` otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Pki(e) => match e.kind() {
                ErrorKind::Configuration => 2,
                ErrorKind::Conflict | ErrorKind::Refusal => 3,
                ErrorKind::Security => 4,
                _ => 1,
            },
            Self::Format(_) | Self::Task(_) | Self::Io(_) => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Pki(e) => write!(f, "{e}"),
            Self::Format(msg) => write!(f, "{msg}"),
            Self::Task(msg) => write!(f, "bootstrap task failed: {msg}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Pki(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Format(_) | Self::Task(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<forge_pki::Error> for CliError {
    fn from(err: forge_pki::Error) -> Self {
        Self::Pki(err)
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_follow_error_kind() {
        let locked = CliError::from(forge_pki::Error::Locked(PathBuf::from("mypki/.lock")));
        assert_eq!(locked.exit_code(), 3);

        let config = CliError::from(ConfigError::Missing("ca.root".into()));
        assert_eq!(config.exit_code(), 2);
        assert_eq!(config.category(), "configuration error");

        let io = CliError::from(io::Error::other("disk full"));
        assert_eq!(io.exit_code(), 1);
        assert!(!io.is_security());
    }

    #[test]
    fn permission_failure_is_a_security_error() {
        let err = CliError::from(forge_pki::Error::PermissionApplication {
            path: PathBuf::from("mypki/root/private/root.key.pem"),
            reason: "mode is 0o644".into(),
        });
        assert!(err.is_security());
        assert_eq!(err.exit_code(), 4);
        assert_eq!(err.category(), "security error");
    }

    #[test]
    fn display_passes_through_message() {
        let err = CliError::Task("panicked".into());
        assert_eq!(err.to_string(), "bootstrap task failed: panicked");
    }
}
