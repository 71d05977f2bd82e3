//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// pkiforge - bootstrap a root, intermediate and OCSP responder CA.
#[derive(Parser, Debug, Clone)]
#[command(name = "pkiforge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "PKIFORGE_CONFIG", default_value = forge_config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the PKI described by the configuration file.
    ///
    /// Does nothing if the PKI has already been built.
    Bootstrap,

    /// Show whether the PKI is built and each CA's bookkeeping.
    Status {
        /// PKI directory to inspect instead of the configured one.
        #[arg(long)]
        pki_dir: Option<PathBuf>,
    },

    /// Write a configuration template to the configuration path.
    InitConfig,
}
