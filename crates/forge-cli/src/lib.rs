//! # forge-cli
//!
//! Command-line interface for pkiforge.
//!
//! Provides commands for:
//! - Bootstrapping a root, intermediate and OCSP responder CA from a JSON
//!   configuration file
//! - Inspecting an existing PKI directory
//! - Writing a configuration template
//!
//! Bootstrapping an already complete PKI is not an error: the command
//! reports that the PKI exists and changes nothing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format};
pub use error::CliError;
pub use output::OutputFormat;
