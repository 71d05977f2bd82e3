//! The `bootstrap` command.

use std::io::Write;
use std::path::{Path, PathBuf};

use forge_pki::Orchestrator;
use tracing::{info, warn};

use crate::error::CliError;
use crate::output::{BootstrapOutcome, OutputFormat};

/// Builds the PKI described by a configuration file.
pub struct BootstrapCommand {
    config: PathBuf,
}

impl BootstrapCommand {
    /// Creates a new bootstrap command for the given configuration file.
    #[must_use]
    pub fn new(config: impl AsRef<Path>) -> Self {
        Self {
            config: config.as_ref().to_path_buf(),
        }
    }

    /// Executes the bootstrap.
    ///
    /// An already complete PKI is reported as [`BootstrapOutcome::AlreadyExists`]
    /// rather than as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any bootstrap
    /// stage fails.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let outcome = self.run().await?;
        format.write(writer, &outcome)
    }

    async fn run(&self) -> Result<BootstrapOutcome, CliError> {
        let config = forge_config::load(&self.config)?;
        let pki_dir = config.pki_dir.clone();
        info!(config = %self.config.display(), pki_dir = %pki_dir.display(), "starting bootstrap");

        // Key generation and file I/O are blocking.
        let result = tokio::task::spawn_blocking(move || Orchestrator::new(config).run())
            .await
            .map_err(|e| CliError::Task(e.to_string()))?;

        match result {
            Ok(report) => Ok(BootstrapOutcome::Created { report }),
            Err(e) if e.is_refusal() => {
                warn!(pki_dir = %pki_dir.display(), "PKI already exists, nothing to do");
                Ok(BootstrapOutcome::AlreadyExists { pki_dir })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use forge_config::ConfigError;

    #[tokio::test]
    async fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let cmd = BootstrapCommand::new(dir.path().join("absent.json"));
        let mut buf = Vec::new();

        let err = cmd
            .execute(&mut buf, &OutputFormat::new(Format::Table))
            .await
            .err();
        assert!(matches!(err, Some(CliError::Config(ConfigError::NotFound(_)))));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn invalid_config_writes_nothing() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let config = dir.path().join("pkiforge.json");
        let pki_dir = dir.path().join("mypki");
        let json = forge_config::TEMPLATE
            .replace("\"mypki\"", &format!("{:?}", pki_dir.display().to_string()))
            .replace("\"key_bits\": 4096", "\"key_bits\": 512");
        std::fs::write(&config, json).unwrap_or_else(|e| panic!("{e}"));

        let mut buf = Vec::new();
        let err = BootstrapCommand::new(&config)
            .execute(&mut buf, &OutputFormat::new(Format::Json))
            .await
            .err();

        assert!(matches!(err, Some(CliError::Config(_))));
        assert!(!pki_dir.exists());
    }
}
