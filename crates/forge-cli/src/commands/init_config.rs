//! The `init-config` command.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::CliError;
use crate::output::{OutputFormat, TemplateWritten};

/// Writes a configuration template.
pub struct InitConfigCommand {
    path: PathBuf,
}

impl InitConfigCommand {
    /// Creates a command writing the template to `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Writes the template, refusing to overwrite an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists or cannot be written.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        forge_config::write_template(&self.path)?;
        info!(path = %self.path.display(), "configuration template written");
        format.write(
            writer,
            &TemplateWritten {
                path: self.path.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use forge_config::ConfigError;

    #[test]
    fn writes_a_loadable_template() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("pkiforge.json");
        let mut buf = Vec::new();

        InitConfigCommand::new(&path)
            .execute(&mut buf, &OutputFormat::new(Format::Table))
            .unwrap_or_else(|e| panic!("{e}"));

        let output = String::from_utf8(buf).unwrap_or_default();
        assert!(output.contains("Wrote configuration template"));
        assert!(forge_config::load(&path).is_ok());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("pkiforge.json");
        std::fs::write(&path, "{}").unwrap_or_else(|e| panic!("{e}"));

        let err = InitConfigCommand::new(&path)
            .execute(&mut Vec::new(), &OutputFormat::new(Format::Table))
            .err();
        assert!(matches!(err, Some(CliError::Config(ConfigError::AlreadyExists(_)))));
        assert_eq!(std::fs::read_to_string(&path).unwrap_or_default(), "{}");
    }
}
