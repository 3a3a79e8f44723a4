//! `pxelab validate` command handler
//!
//! Opens a tunnel to the environment's boot service, boots one virtual client
//! on the environment's network and reports each phase.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use pxelab_core::config::PxelabConfig;
use pxelab_core::types::{BootAttempt, Environment};
use pxelab_drivers::HostDrivers;
use pxelab_tunnel::{
    HttpPortProbe, KubectlPortForward, KubectlTunnel, RemoteEndpoint, TunnelConfig, TunnelError,
};
use pxelab_validate::{BootServiceLeases, BootValidator, HttpCallbackSource, ValidateError};

use crate::cli::ValidateArgs;
use crate::commands::environment_store;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::scenario::{BootSection, Scenario};

/// Execute the `validate` command.
pub async fn execute(
    args: ValidateArgs,
    config: &PxelabConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let scenario = Scenario::load(&args.scenario).await?;
    let env = environment_store(config).find(&args.id).await?;
    let drivers = HostDrivers::from_config(&config.drivers);

    let attempt = boot_environment(config, &drivers, &env, &scenario.boot).await?;
    let report = BootReport {
        environment_id: env.id.clone(),
        attempt,
    };
    writer.render(&report)?;
    report.into_result()
}

/// Runs one boot attempt against a provisioned environment.
///
/// A failed attempt is still `Ok`; only problems that prevent the attempt
/// from running at all (missing handles, tunnel failure) are errors. A tunnel
/// that is not ready in time is noted in the attempt, which runs anyway. The
/// tunnel is stopped before returning.
pub async fn boot_environment(
    config: &PxelabConfig,
    drivers: &HostDrivers,
    env: &Environment,
    boot: &BootSection,
) -> Result<BootAttempt, CliError> {
    let network = env.network.as_deref().ok_or_else(|| {
        CliError::Command(format!("environment {} has no virtual network", env.id))
    })?;
    let service_id = env.boot_service.clone().ok_or_else(|| {
        CliError::Command(format!("environment {} has no boot service", env.id))
    })?;

    let remote = RemoteEndpoint::from_environment(env)?;
    let tunnel_config = TunnelConfig::from_core(&config.tunnel, remote);
    let probe = HttpPortProbe::new(&config.tunnel.probe_path)?;
    let launcher = KubectlPortForward::new(&config.drivers.kubectl_bin);
    let mut tunnel = KubectlTunnel::open(tunnel_config, launcher, probe).await?;

    let result = attempt_through(&tunnel, config, drivers, network, service_id, boot).await;
    tunnel.stop().await;
    result
}

async fn attempt_through(
    tunnel: &KubectlTunnel,
    config: &PxelabConfig,
    drivers: &HostDrivers,
    network: &str,
    service_id: String,
    boot: &BootSection,
) -> Result<BootAttempt, CliError> {
    let unready = tolerate_not_ready(tunnel.wait_ready(config.tunnel.ready_timeout()).await)?;
    let base_url = tunnel.base_url();
    if unready.is_none() {
        info!(url = %base_url, "tunnel ready");
    }

    let callbacks = HttpCallbackSource::new(&base_url, &config.validation.callback_path)?;
    let leases = BootServiceLeases::new(Arc::new(drivers.boot.clone()), service_id);
    let validator = BootValidator::new(Arc::new(drivers.vm.clone()), leases, callbacks);

    let mut attempt = match validator.run(&boot.run_config(&config.validation, network)).await {
        Ok(attempt) => attempt,
        Err(ValidateError::Failed(attempt)) => *attempt,
        Err(e) => return Err(e.into()),
    };
    if let Some(note) = unready {
        attempt.errors.insert(0, note);
    }
    Ok(attempt)
}

/// A tunnel that never became ready is not fatal: the supervisor keeps
/// reconnecting while the boot phases run under their own timeouts. Returns
/// the note to attach to the attempt.
fn tolerate_not_ready(ready: Result<(), TunnelError>) -> Result<Option<String>, CliError> {
    match ready {
        Ok(()) => Ok(None),
        Err(e @ TunnelError::NotReady { .. }) => {
            warn!(error = %e, "tunnel not ready, running boot attempt anyway");
            Ok(Some(format!("tunnel not ready before boot: {e}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Phase-by-phase report of one boot attempt.
#[derive(Debug, Serialize)]
pub struct BootReport {
    pub environment_id: String,
    pub attempt: BootAttempt,
}

impl BootReport {
    /// `Ok` when the attempt succeeded, a validation failure otherwise.
    pub fn into_result(self) -> Result<(), CliError> {
        if self.attempt.success {
            Ok(())
        } else {
            Err(ValidateError::Failed(Box::new(self.attempt)).into())
        }
    }
}

impl Render for BootReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        render_attempt(&self.attempt, w)
    }
}

pub fn render_attempt(attempt: &BootAttempt, w: &mut dyn Write) -> std::io::Result<()> {
    let verdict = if attempt.success { "PASSED" } else { "FAILED" };
    writeln!(w, "Boot attempt for '{}': {verdict}", attempt.target)?;
    if let Some(address) = attempt.address {
        writeln!(w, "  Address: {address}")?;
    }
    writeln!(w, "  Phases:")?;
    for result in &attempt.phases {
        let mark = if result.satisfied { "ok" } else { "FAIL" };
        writeln!(
            w,
            "    [{mark:<4}] {:<20} {}",
            result.phase.to_string(),
            result.message.as_deref().unwrap_or("")
        )?;
    }
    if !attempt.errors.is_empty() {
        writeln!(w, "  Errors:")?;
        for error in &attempt.errors {
            writeln!(w, "    - {error}")?;
        }
    }
    if !attempt.logs.is_empty() {
        writeln!(w, "  Console ({} lines):", attempt.logs.len())?;
        for line in &attempt.logs {
            writeln!(w, "    {line}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pxelab_core::types::Phase;

    use super::*;

    fn failed_attempt() -> BootAttempt {
        let mut attempt = BootAttempt::new("vm-1");
        attempt.record(
            Phase::LeaseAcquired,
            false,
            Some("no lease within 30s (30 polls)".to_owned()),
        );
        attempt.record(Phase::BootFileFetched, false, None);
        attempt.record(Phase::CallbackObserved, true, Some("callback received".to_owned()));
        attempt.errors.push("failed to destroy virtual client: busy".to_owned());
        attempt.finish(&[
            Phase::LeaseAcquired,
            Phase::BootFileFetched,
            Phase::CallbackObserved,
        ]);
        attempt
    }

    #[test]
    fn test_render_shows_every_phase_and_error() {
        let mut buffer = Vec::new();
        render_attempt(&failed_attempt(), &mut buffer).expect("render");
        let output = String::from_utf8(buffer).expect("valid UTF-8");

        assert!(output.contains("'vm-1': FAILED"));
        assert!(output.contains("[FAIL] lease-acquired"));
        assert!(output.contains("no lease within 30s"));
        assert!(output.contains("[ok  ] callback-observed"));
        assert!(output.contains("- failed to destroy virtual client"));
    }

    #[test]
    fn test_failed_report_maps_to_validation_exit_code() {
        let report = BootReport {
            environment_id: "3f2a".to_owned(),
            attempt: failed_attempt(),
        };
        let err = report.into_result().unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_unready_tunnel_is_noted_not_fatal() {
        let not_ready = TunnelError::NotReady {
            addr: "127.0.0.1:18080".parse().expect("addr"),
            secs: 60,
        };

        let note = tolerate_not_ready(Err(not_ready)).expect("not fatal");

        let note = note.expect("note for the report");
        assert!(note.starts_with("tunnel not ready before boot"), "got: {note}");
        assert!(tolerate_not_ready(Ok(())).expect("ready").is_none());
    }

    #[test]
    fn test_stopped_tunnel_is_still_an_error() {
        let err = tolerate_not_ready(Err(TunnelError::Stopped)).unwrap_err();
        assert!(matches!(err, CliError::Tunnel(TunnelError::Stopped)));
    }

    #[test]
    fn test_json_report_keeps_phase_names() {
        let report = BootReport {
            environment_id: "3f2a".to_owned(),
            attempt: failed_attempt(),
        };
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["attempt"]["phases"][0]["phase"], "lease-acquired");
        assert_eq!(json["attempt"]["success"], false);
    }
}
