//! Output formatting for CLI commands.
//!
//! Every command result is written either as a human-readable table or as
//! pretty-printed JSON for scripting.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use forge_pki::{BootstrapReport, BootstrapState, IssuedCertificate, Role};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON formats.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Writes output in the configured format.
    pub fn write<W, T>(&self, writer: &mut W, data: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, data)?;
                writeln!(writer)?;
            }
            Format::Table => data.write_table(writer)?,
        }
        Ok(())
    }
}

/// Trait for types that can be displayed as tables.
pub trait TableDisplay {
    /// Writes the data as a formatted table.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

fn heading<W: Write>(writer: &mut W, title: &str) -> Result<(), CliError> {
    writeln!(writer, "{title}")?;
    writeln!(writer, "{}", "═".repeat(title.chars().count().max(20)))?;
    Ok(())
}

/// Outcome of the `bootstrap` command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// The PKI was built by this run.
    Created {
        /// What was built.
        #[serde(flatten)]
        report: BootstrapReport,
    },
    /// A complete PKI was already present; nothing was changed.
    AlreadyExists {
        /// The existing PKI directory.
        pki_dir: PathBuf,
    },
}

impl TableDisplay for BootstrapOutcome {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        match self {
            Self::AlreadyExists { pki_dir } => {
                writeln!(writer, "PKI already exists at {}; nothing to do.", pki_dir.display())?;
            }
            Self::Created { report } => {
                heading(writer, "PKI Bootstrap")?;
                writeln!(writer, "  Directory:   {}", report.pki_dir.display())?;
                writeln!(writer, "  Chain:       {}", report.chain.display())?;
                let elapsed = report.completed_at - report.started_at;
                writeln!(writer, "  Duration:    {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)?;
                writeln!(writer, "  Stages:      {}", stages(&report.transitions))?;
                writeln!(writer)?;
                write_certificates(writer, &report.certificates)?;
            }
        }
        Ok(())
    }
}

fn stages(transitions: &[BootstrapState]) -> String {
    transitions.iter().map(ToString::to_string).collect::<Vec<_>>().join(" → ")
}

fn write_certificates<W: Write>(writer: &mut W, certificates: &[IssuedCertificate]) -> Result<(), CliError> {
    writeln!(
        writer,
        "{:<14} {:<8} {:<32} {:<32} {}",
        "ROLE", "SERIAL", "SUBJECT", "ISSUER", "EXPIRES"
    )?;
    writeln!(writer, "{}", "─".repeat(100))?;
    for cert in certificates {
        writeln!(
            writer,
            "{:<14} {:<8} {:<32} {:<32} {}",
            cert.role.to_string(),
            cert.serial,
            truncate(&cert.subject, 32),
            truncate(&cert.issuer, 32),
            cert.not_after.format("%Y-%m-%d")
        )?;
    }
    Ok(())
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let kept: String = value.chars().take(width.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Condition of a PKI directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PkiCondition {
    /// Nothing has been built.
    Absent,
    /// Some state exists but the readiness marker is missing.
    Partial,
    /// The readiness marker is present.
    Ready,
}

impl std::fmt::Display for PkiCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::Partial => "partial (manual cleanup required)",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Bookkeeping summary of one CA.
#[derive(Debug, Clone, Serialize)]
pub struct CaSummary {
    /// CA role.
    pub role: Role,
    /// Subject common name, if the certificate exists.
    pub subject: Option<String>,
    /// Certificate expiry, if the certificate exists.
    pub not_after: Option<DateTime<Utc>>,
    /// Next serial in OpenSSL hex form.
    pub next_serial: String,
    /// Number of certificates issued.
    pub issued: usize,
    /// Next CRL number in OpenSSL hex form, if the CA keeps one.
    pub crl_number: Option<String>,
}

/// Result of the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct PkiStatus {
    /// PKI directory inspected.
    pub pki_dir: PathBuf,
    /// Overall condition.
    pub condition: PkiCondition,
    /// When the PKI was completed.
    pub created_at: Option<DateTime<Utc>>,
    /// Per-CA bookkeeping.
    pub authorities: Vec<CaSummary>,
}

impl TableDisplay for PkiStatus {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        heading(writer, "PKI Status")?;
        writeln!(writer, "  Directory:   {}", self.pki_dir.display())?;
        writeln!(writer, "  Condition:   {}", self.condition)?;
        if let Some(created_at) = self.created_at {
            writeln!(writer, "  Created:     {}", created_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }

        for ca in &self.authorities {
            writeln!(writer)?;
            writeln!(writer, "{} CA", capitalize(&ca.role.to_string()))?;
            writeln!(writer, "{}", "─".repeat(20))?;
            writeln!(writer, "  Subject:     {}", ca.subject.as_deref().unwrap_or("-"))?;
            match ca.not_after {
                Some(not_after) => writeln!(writer, "  Expires:     {}", not_after.format("%Y-%m-%d"))?,
                None => writeln!(writer, "  Expires:     -")?,
            }
            writeln!(writer, "  Next serial: {}", ca.next_serial)?;
            writeln!(writer, "  Issued:      {}", ca.issued)?;
            if let Some(crl_number) = &ca.crl_number {
                writeln!(writer, "  CRL number:  {crl_number}")?;
            }
        }
        Ok(())
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

/// Result of the `init-config` command.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateWritten {
    /// Path the template was written to.
    pub path: PathBuf,
}

impl TableDisplay for TemplateWritten {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Wrote configuration template to {}", self.path.display())?;
        writeln!(writer, "Edit the subjects, CRL URL and passphrases, then run `pkiforge bootstrap`.")?;
        Ok(())
    }
}
