//! pkiforge binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use forge_cli::cli::{Cli, Commands};
use forge_cli::commands::{BootstrapCommand, InitConfigCommand, StatusCommand};
use forge_cli::output::OutputFormat;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_security() {
                eprintln!(
                    "SECURITY WARNING: private keys or certificates may be readable by other users. \
                     Inspect and fix file permissions before using this PKI."
                );
            }
            eprintln!("Error: {}: {e}", e.category());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), forge_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Bootstrap => {
            let cmd = BootstrapCommand::new(&cli.config);
            cmd.execute(&mut stdout, &format).await?;
        }
        Commands::Status { pki_dir } => {
            let cmd = StatusCommand::new(&cli.config, pki_dir);
            cmd.execute(&mut stdout, &format)?;
        }
        Commands::InitConfig => {
            let cmd = InitConfigCommand::new(&cli.config);
            cmd.execute(&mut stdout, &format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_cli::Format;
    use std::path::Path;

    #[test]
    fn cli_parses_bootstrap() {
        let cli = Cli::try_parse_from(["pkiforge", "bootstrap"]).unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(cli.command, Commands::Bootstrap));
        assert_eq!(cli.format, Format::Table);
    }

    #[test]
    fn cli_parses_config_and_format() {
        let cli = Cli::try_parse_from(["pkiforge", "-c", "site.json", "--format", "json", "init-config"])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cli.config, Path::new("site.json"));
        assert_eq!(cli.format, Format::Json);
        assert!(matches!(cli.command, Commands::InitConfig));
    }

    #[test]
    fn cli_parses_status_override() {
        let cli = Cli::try_parse_from(["pkiforge", "status", "--pki-dir", "/srv/pki"])
            .unwrap_or_else(|e| panic!("{e}"));
        match cli.command {
            Commands::Status { pki_dir } => assert_eq!(pki_dir.as_deref(), Some(Path::new("/srv/pki"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["pkiforge", "--format", "xml", "status"]).is_err());
    }
}
