//! `pxelab run` command handler
//!
//! provision -> tunnel -> boot attempt -> report -> teardown.

use std::io::Write;

use serde::Serialize;
use tracing::{error, info};

use pxelab_core::config::PxelabConfig;
use pxelab_core::types::BootAttempt;
use pxelab_drivers::HostDrivers;

use crate::cli::RunArgs;
use crate::commands::env::{DestroyReport, provision_and_record, release};
use crate::commands::validate::{boot_environment, render_attempt};
use crate::commands::{environment_store, host_manager};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::scenario::Scenario;

/// Execute the `run` command.
///
/// The environment is torn down whatever the attempt's outcome unless
/// `--keep` is given. When several things fail, a teardown failure decides
/// the exit code, then an error that kept the attempt from running, then a
/// failed attempt.
pub async fn execute(
    args: RunArgs,
    config: &PxelabConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let scenario = Scenario::load(&args.scenario).await?;
    let drivers = HostDrivers::from_config(&config.drivers);
    let manager = host_manager(config, &drivers)?;
    let store = environment_store(config);

    let env = provision_and_record(&manager, &store, &scenario.environment).await?;
    info!(env_id = %env.id, scenario = %scenario.name, "environment ready, starting boot attempt");

    let outcome = boot_environment(config, &drivers, &env, &scenario.boot).await;

    let (teardown, teardown_result) = if args.keep {
        info!(env_id = %env.id, "keeping environment");
        (None, Ok(()))
    } else {
        let (report, result) = release(&manager, &store, &env, false).await;
        (Some(report), result)
    };

    let (attempt, run_error) = match outcome {
        Ok(attempt) => (Some(attempt), None),
        Err(e) => (None, Some(e)),
    };

    let report = RunReport {
        scenario: scenario.name.clone(),
        environment_id: env.id.clone(),
        kept: args.keep,
        attempt,
        error: run_error.as_ref().map(ToString::to_string),
        teardown,
    };
    writer.render(&report)?;

    if let Err(e) = teardown_result {
        if let Some(run_error) = &run_error {
            error!(error = %run_error, "boot attempt could not run");
        }
        return Err(e);
    }
    if let Some(e) = run_error {
        return Err(e);
    }
    match report.attempt {
        Some(attempt) if !attempt.success => {
            Err(pxelab_validate::ValidateError::Failed(Box::new(attempt)).into())
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub environment_id: String,
    pub kept: bool,
    /// `None` when the attempt could not be started.
    pub attempt: Option<BootAttempt>,
    pub error: Option<String>,
    /// `None` with `--keep`.
    pub teardown: Option<DestroyReport>,
}

impl Render for RunReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Scenario '{}' (environment {})", self.scenario, self.environment_id)?;
        match (&self.attempt, &self.error) {
            (Some(attempt), _) => render_attempt(attempt, w)?,
            (None, Some(error)) => writeln!(w, "Boot attempt did not run: {error}")?,
            (None, None) => {}
        }
        match &self.teardown {
            Some(teardown) => teardown.render_text(w)?,
            None if self.kept => writeln!(
                w,
                "Environment kept; destroy it with `pxelab env destroy {}`.",
                self.environment_id
            )?,
            None => {}
        }
        Ok(())
    }
}
