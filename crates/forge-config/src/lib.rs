//! Configuration file loading for pkiforge.
//!
//! The configuration is a JSON document naming the PKI directory and the
//! identity of each CA:
//!
//! ```json
//! { "pki_dir": "mypki", "key_bits": 4096,
//!   "ca": { "root": { "country": "DE", ..., "days": 7300, "passphrase": "..." },
//!           "intermediate": { ..., "ocsp": { "commonname": "...", "passphrase": "..." },
//!                             "crl": { "url": "..." } } } }
//! ```
//!
//! Subject fields never fall back to defaults; every missing value is
//! reported by its dotted path.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use forge_pki::{BootstrapConfig, CaProfile, DEFAULT_KEY_BITS, Passphrase, SubjectName};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Configuration file used when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "pkiforge.json";

/// PKI directory used when the file does not name one.
pub const DEFAULT_PKI_DIR: &str = "mypki";

/// Validity of the OCSP responder certificate unless configured.
pub const DEFAULT_OCSP_DAYS: i64 = 3650;

/// Starting point written by `pkiforge init-config`.
pub const TEMPLATE: &str = r#"{
  "pki_dir": "mypki",
  "key_bits": 4096,
  "ca": {
    "root": {
      "country": "DE",
      "state": "Berlin",
      "locality": "Berlin",
      "organization": "Example Org",
      "commonname": "Example Root CA",
      "days": 7300,
      "passphrase": "change-me-root"
    },
    "intermediate": {
      "country": "DE",
      "state": "Berlin",
      "locality": "Berlin",
      "organization": "Example Org",
      "commonname": "Example Intermediate CA",
      "days": 3650,
      "passphrase": "change-me-intermediate",
      "ocsp": {
        "commonname": "ocsp.example.com",
        "passphrase": "change-me-ocsp"
      },
      "crl": {
        "url": "http://crl.example.com/intermediate.crl.pem"
      }
    }
  }
}
"#;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file '{}' not found; run `pkiforge init-config` to create one", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read or written.
    #[error("failed to access configuration file '{}': {source}", .path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// `init-config` found an existing file.
    #[error("configuration file '{}' already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// The file is not valid JSON of the expected shape.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A required value is absent.
    #[error("missing configuration value `{0}`")]
    Missing(String),

    /// A value is present but unusable.
    #[error("invalid configuration value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the value.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    /// Returns the dotted path of the offending value, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Missing(field) | Self::Invalid { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }
}

/// Subject and key settings of one CA.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaSection {
    /// Two-letter country code.
    pub country: Option<String>,
    /// State or province.
    pub state: Option<String>,
    /// Locality.
    pub locality: Option<String>,
    /// Organization.
    pub organization: Option<String>,
    /// Common name.
    pub commonname: Option<String>,
    /// Certificate validity in days.
    pub days: Option<i64>,
    /// Private key passphrase.
    pub passphrase: Option<Passphrase>,
}

/// OCSP responder settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcspSection {
    /// Responder host name; also forms the advertised OCSP URL.
    pub commonname: Option<String>,
    /// Private key passphrase.
    pub passphrase: Option<Passphrase>,
    /// Certificate validity in days.
    pub days: Option<i64>,
}

/// CRL distribution settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrlSection {
    /// CRL distribution URL.
    pub url: Option<String>,
}

/// Intermediate CA settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntermediateSection {
    /// Subject and key settings.
    #[serde(flatten)]
    pub ca: CaSection,
    /// OCSP responder signed by the intermediate.
    pub ocsp: Option<OcspSection>,
    /// CRL distribution.
    pub crl: Option<CrlSection>,
}

/// The `ca` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaConfig {
    /// Root CA.
    pub root: Option<CaSection>,
    /// Intermediate CA.
    pub intermediate: Option<IntermediateSection>,
}

/// The configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PkiConfig {
    /// PKI root directory.
    pub pki_dir: Option<PathBuf>,
    /// RSA key size.
    pub key_bits: Option<usize>,
    /// CA identities.
    pub ca: Option<CaConfig>,
}

impl PkiConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is absent, or an error
    /// if it cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        debug!(path = %path.display(), "loaded configuration file");
        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the JSON is malformed.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Returns the PKI directory, defaulting to [`DEFAULT_PKI_DIR`].
    #[must_use]
    pub fn pki_dir(&self) -> PathBuf {
        self.pki_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PKI_DIR))
    }

    /// Resolves the file into the bootstrap input and validates it.
    ///
    /// The OCSP responder inherits country, state, locality and organization
    /// from the intermediate; the intermediate advertises the responder at
    /// `http://<ocsp commonname>`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] or [`ConfigError::Invalid`] naming
    /// the first offending value.
    pub fn to_bootstrap(&self) -> Result<BootstrapConfig, ConfigError> {
        let ca = require(self.ca.as_ref(), "ca")?;
        let root_section = require(ca.root.as_ref(), "ca.root")?;
        let intermediate_section = require(ca.intermediate.as_ref(), "ca.intermediate")?;
        let ocsp_section = require(intermediate_section.ocsp.as_ref(), "ca.intermediate.ocsp")?;
        let crl_section = require(intermediate_section.crl.as_ref(), "ca.intermediate.crl")?;

        let root = profile(root_section, "ca.root")?;
        let intermediate_subject = subject(&intermediate_section.ca, "ca.intermediate")?;
        let intermediate = profile(&intermediate_section.ca, "ca.intermediate")?;

        let ocsp_name = text(ocsp_section.commonname.as_ref(), "ca.intermediate.ocsp.commonname")?;
        let crl_url = text(crl_section.url.as_ref(), "ca.intermediate.crl.url")?;
        let intermediate = intermediate
            .with_ocsp_url(format!("http://{ocsp_name}"))
            .with_crl_url(crl_url);

        let ocsp = CaProfile::new(
            SubjectName {
                common_name: ocsp_name,
                ..intermediate_subject
            },
            ocsp_section.days.unwrap_or(DEFAULT_OCSP_DAYS),
            secret(ocsp_section.passphrase.as_ref(), "ca.intermediate.ocsp.passphrase")?,
        );

        let config = BootstrapConfig {
            pki_dir: self.pki_dir(),
            key_bits: self.key_bits.unwrap_or(DEFAULT_KEY_BITS),
            root,
            intermediate,
            ocsp,
        };
        config.validate().map_err(|e| match e.root_cause() {
            forge_pki::Error::Configuration { field, reason } => ConfigError::Invalid {
                field: field.clone(),
                reason: reason.clone(),
            },
            other => ConfigError::Invalid {
                field: "ca".into(),
                reason: other.to_string(),
            },
        })?;
        Ok(config)
    }
}

/// Loads and resolves a configuration file in one step.
///
/// # Errors
///
/// Returns any error of [`PkiConfig::from_file`] or [`PkiConfig::to_bootstrap`].
pub fn load(path: impl AsRef<Path>) -> Result<BootstrapConfig, ConfigError> {
    PkiConfig::from_file(path)?.to_bootstrap()
}

/// Writes [`TEMPLATE`] to `path`, refusing to overwrite an existing file.
///
/// # Errors
///
/// Returns [`ConfigError::AlreadyExists`] if the file exists, or
/// [`ConfigError::Read`] if it cannot be written.
pub fn write_template(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    use std::io::Write;

    let path = path.as_ref();
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => ConfigError::AlreadyExists(path.to_path_buf()),
            _ => ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
    file.write_all(TEMPLATE.as_bytes())
        .map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(path = %path.display(), "wrote configuration template");
    Ok(())
}

fn require<'a, T>(value: Option<&'a T>, field: &str) -> Result<&'a T, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing(field.into()))
}

fn text(value: Option<&String>, field: &str) -> Result<String, ConfigError> {
    let value = require(value, field)?;
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: field.into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(value.clone())
}

fn secret(value: Option<&Passphrase>, field: &str) -> Result<Passphrase, ConfigError> {
    let value = require(value, field)?;
    if value.is_empty() {
        return Err(ConfigError::Invalid {
            field: field.into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(value.clone())
}

fn subject(section: &CaSection, prefix: &str) -> Result<SubjectName, ConfigError> {
    Ok(SubjectName {
        country: text(section.country.as_ref(), &format!("{prefix}.country"))?,
        state: text(section.state.as_ref(), &format!("{prefix}.state"))?,
        locality: text(section.locality.as_ref(), &format!("{prefix}.locality"))?,
        organization: text(section.organization.as_ref(), &format!("{prefix}.organization"))?,
        common_name: text(section.commonname.as_ref(), &format!("{prefix}.commonname"))?,
    })
}

fn profile(section: &CaSection, prefix: &str) -> Result<CaProfile, ConfigError> {
    let subject = subject(section, prefix)?;
    let days = *require(section.days.as_ref(), &format!("{prefix}.days"))?;
    let passphrase = secret(section.passphrase.as_ref(), &format!("{prefix}.passphrase"))?;
    Ok(CaProfile::new(subject, days, passphrase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    fn template_without(path: &[&str]) -> String {
        let mut value: serde_json::Value = serde_json::from_str(TEMPLATE).unwrap();
        let (last, parents) = path.split_last().unwrap();
        let mut node = &mut value;
        for key in parents {
            node = node.get_mut(*key).unwrap();
        }
        node.as_object_mut().unwrap().remove(*last);
        value.to_string()
    }

    #[test]
    fn template_resolves() {
        let config = PkiConfig::from_json(TEMPLATE).unwrap().to_bootstrap().unwrap();

        assert_eq!(config.pki_dir, PathBuf::from("mypki"));
        assert_eq!(config.key_bits, 4096);
        assert_eq!(config.root.subject.common_name, "Example Root CA");
        assert_eq!(config.root.days, 7300);
        assert_eq!(
            config.intermediate.ocsp_url.as_deref(),
            Some("http://ocsp.example.com")
        );
        assert_eq!(
            config.intermediate.crl_url.as_deref(),
            Some("http://crl.example.com/intermediate.crl.pem")
        );
    }

    #[test]
    fn ocsp_inherits_intermediate_subject() {
        let config = PkiConfig::from_json(TEMPLATE).unwrap().to_bootstrap().unwrap();

        assert_eq!(config.ocsp.subject.common_name, "ocsp.example.com");
        assert_eq!(config.ocsp.subject.country, config.intermediate.subject.country);
        assert_eq!(
            config.ocsp.subject.organization,
            config.intermediate.subject.organization
        );
        assert_eq!(config.ocsp.days, DEFAULT_OCSP_DAYS);
        assert_eq!(config.ocsp.passphrase.expose(), b"change-me-ocsp");
    }

    #[test]
    fn missing_values_are_reported_by_path() {
        for path in [
            vec!["ca", "root", "country"],
            vec!["ca", "root", "passphrase"],
            vec!["ca", "intermediate", "days"],
            vec!["ca", "intermediate", "ocsp", "passphrase"],
            vec!["ca", "intermediate", "crl", "url"],
            vec!["ca", "intermediate", "crl"],
        ] {
            let json = template_without(&path);
            let err = PkiConfig::from_json(&json).unwrap().to_bootstrap().unwrap_err();
            assert!(matches!(err, ConfigError::Missing(_)), "{err}");
            assert_eq!(err.field(), Some(path.join(".").as_str()));
        }
    }

    #[test]
    fn empty_values_are_invalid() {
        let json = TEMPLATE.replace("\"Example Root CA\"", "\"  \"");
        let err = PkiConfig::from_json(&json).unwrap().to_bootstrap().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert_eq!(err.field(), Some("ca.root.commonname"));
    }

    #[test]
    fn core_validation_errors_keep_their_path() {
        let json = TEMPLATE.replace("\"days\": 3650", "\"days\": 0");
        let err = PkiConfig::from_json(&json).unwrap().to_bootstrap().unwrap_err();
        assert_eq!(err.field(), Some("ca.intermediate.days"));

        let json = TEMPLATE.replace("\"key_bits\": 4096", "\"key_bits\": 1024");
        let err = PkiConfig::from_json(&json).unwrap().to_bootstrap().unwrap_err();
        assert_eq!(err.field(), Some("key_bits"));

        let json = TEMPLATE.replace("\"key_bits\": 4096", "\"key_bits\": 2048");
        let err = PkiConfig::from_json(&json).unwrap().to_bootstrap().unwrap_err();
        assert_eq!(err.field(), Some("key_bits"));

        let json = TEMPLATE.replace("\"days\": 7300", "\"days\": 3000000");
        let err = PkiConfig::from_json(&json).unwrap().to_bootstrap().unwrap_err();
        assert_eq!(err.field(), Some("ca.root.days"));
    }

    #[test]
    fn defaults_for_directory_and_key_size() {
        let json = template_without(&["pki_dir"]);
        let json = {
            let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
            value.as_object_mut().unwrap().remove("key_bits");
            value.to_string()
        };
        let config = PkiConfig::from_json(&json).unwrap().to_bootstrap().unwrap();
        assert_eq!(config.pki_dir, PathBuf::from(DEFAULT_PKI_DIR));
        assert_eq!(config.key_bits, DEFAULT_KEY_BITS);
    }

    #[test]
    fn load_from_file() {
        let file = create_temp_config(TEMPLATE);
        let config = load(file.path()).unwrap();
        assert_eq!(config.intermediate.subject.common_name, "Example Intermediate CA");
    }

    #[test]
    fn missing_file_points_at_init_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = PkiConfig::from_file(dir.path().join("pkiforge.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert!(err.to_string().contains("init-config"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let file = create_temp_config("{ not json");
        assert!(matches!(PkiConfig::from_file(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn template_is_never_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);

        write_template(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), TEMPLATE);

        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(write_template(&path), Err(ConfigError::AlreadyExists(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn passphrases_do_not_leak_through_debug() {
        let config = PkiConfig::from_json(TEMPLATE).unwrap();
        assert!(!format!("{config:?}").contains("change-me-root"));
    }
}
