//! pxelab -- disposable network-boot test environments.

mod cli;
mod commands;
mod error;
mod logging;
mod output;
mod scenario;

use std::process::ExitCode;

use clap::Parser;

use pxelab_core::config::GeneralConfig;

use crate::cli::{Cli, Commands};
use crate::commands::config::load_effective;
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let config_path = cli.config.as_deref();

    // `config validate` must be able to report a broken file, so it loads
    // the configuration itself and logging falls back to defaults.
    if let Commands::Config(args) = cli.command {
        let general = match load_effective(config_path, cli.log_level.as_deref()).await {
            Ok(config) => config.general,
            Err(_) => GeneralConfig::default(),
        };
        init_logging(&general)?;
        return commands::config::execute(args, config_path, &writer).await;
    }

    let config = load_effective(config_path, cli.log_level.as_deref()).await?;
    init_logging(&config.general)?;
    tracing::debug!(command = ?cli.command, "pxelab starting");

    match cli.command {
        Commands::Env(args) => commands::env::execute(args, &config, &writer).await,
        Commands::Validate(args) => commands::validate::execute(args, &config, &writer).await,
        Commands::Run(args) => commands::run::execute(args, &config, &writer).await,
        Commands::Certs(args) => commands::certs::execute(args, &writer).await,
        Commands::Config(_) => Ok(()),
    }
}

fn init_logging(general: &GeneralConfig) -> Result<(), CliError> {
    logging::init_tracing(general).map_err(|e| CliError::Config(format!("{e:#}")))?;
    pxelab_core::metrics::describe_all();
    Ok(())
}
