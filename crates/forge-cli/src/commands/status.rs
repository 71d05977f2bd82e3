//! The `status` command.

use std::io::Write;
use std::path::{Path, PathBuf};

use forge_config::PkiConfig;
use forge_pki::state::hex_serial;
use forge_pki::{CaState, Certificate, Role, StateStore};
use tracing::debug;

use crate::error::CliError;
use crate::output::{CaSummary, OutputFormat, PkiCondition, PkiStatus};

/// Reports whether a PKI is built and the bookkeeping of each CA.
pub struct StatusCommand {
    config: PathBuf,
    pki_dir: Option<PathBuf>,
}

impl StatusCommand {
    /// Creates a status command.
    ///
    /// `pki_dir` overrides the directory named in the configuration file, in
    /// which case the configuration file is not read at all.
    #[must_use]
    pub fn new(config: impl AsRef<Path>, pki_dir: Option<PathBuf>) -> Self {
        Self {
            config: config.as_ref().to_path_buf(),
            pki_dir,
        }
    }

    /// Executes the status command.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or the CA state cannot be read.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let pki_dir = match &self.pki_dir {
            Some(dir) => dir.clone(),
            None => PkiConfig::from_file(&self.config)?.pki_dir(),
        };
        let status = inspect(&pki_dir)?;
        format.write(writer, &status)
    }
}

/// Reads the state of the PKI at `pki_dir` without modifying anything.
///
/// # Errors
///
/// Returns an error if a readiness marker, CA state or certificate is present
/// but unreadable.
pub fn inspect(pki_dir: &Path) -> Result<PkiStatus, CliError> {
    let store = StateStore::local(pki_dir);
    let marker = store.readiness()?;
    let condition = match (&marker, store.exists()) {
        (Some(_), _) => PkiCondition::Ready,
        (None, true) => PkiCondition::Partial,
        (None, false) => PkiCondition::Absent,
    };
    debug!(pki_dir = %pki_dir.display(), ?condition, "inspected PKI");

    let mut authorities = Vec::new();
    if condition != PkiCondition::Absent {
        for role in Role::ALL.into_iter().filter(|r| r.is_ca()) {
            if let Some(summary) = summarize(&store, role)? {
                authorities.push(summary);
            }
        }
    }

    Ok(PkiStatus {
        pki_dir: pki_dir.to_path_buf(),
        condition,
        created_at: marker.map(|m| m.created_at),
        authorities,
    })
}

fn summarize(store: &StateStore, role: Role) -> Result<Option<CaSummary>, CliError> {
    let layout = store.layout();
    if !layout.state(role).exists() {
        return Ok(None);
    }
    let state: CaState = store.load(role)?;

    let certificate = if layout.certificate(role).exists() {
        let pem = store.read_artifact(&layout.certificate(role))?;
        Some(Certificate::from_pem(&String::from_utf8_lossy(&pem))?)
    } else {
        None
    };

    Ok(Some(CaSummary {
        role,
        subject: certificate.as_ref().map(|c| c.subject().common_name.clone()),
        not_after: certificate.as_ref().map(Certificate::not_after),
        next_serial: hex_serial(state.serial),
        issued: state.ledger.len(),
        crl_number: state.crl_number.map(hex_serial),
    }))
}
