//! `pxelab env` command handler

use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, warn};

use pxelab_core::config::PxelabConfig;
use pxelab_core::types::{Environment, EnvironmentSpec};
use pxelab_drivers::HostDrivers;
use pxelab_lifecycle::EnvironmentStore;

use crate::cli::{EnvAction, EnvArgs};
use crate::commands::{HostManager, environment_store, host_manager};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::scenario::Scenario;

/// Execute the `env` command.
pub async fn execute(
    args: EnvArgs,
    config: &PxelabConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let store = environment_store(config);
    match args.action {
        EnvAction::Create { scenario } => execute_create(&scenario, config, &store, writer).await,
        EnvAction::Destroy { id, force } => {
            execute_destroy(&id, force, config, &store, writer).await
        }
        EnvAction::List => execute_list(&store, writer).await,
        EnvAction::Show { id } => {
            let env = store.find(&id).await?;
            writer.render(&EnvironmentReport::from(&env))
        }
    }
}

async fn execute_create(
    scenario_path: &Path,
    config: &PxelabConfig,
    store: &EnvironmentStore,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let scenario = Scenario::load(scenario_path).await?;
    let drivers = HostDrivers::from_config(&config.drivers);
    let manager = host_manager(config, &drivers)?;

    let env = provision_and_record(&manager, store, &scenario.environment).await?;
    writer.render(&EnvironmentReport::from(&env))
}

async fn execute_destroy(
    id: &str,
    force: bool,
    config: &PxelabConfig,
    store: &EnvironmentStore,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let env = store.find(id).await?;
    let drivers = HostDrivers::from_config(&config.drivers);
    let manager = host_manager(config, &drivers)?;

    let (report, result) = release(&manager, store, &env, force).await;
    writer.render(&report)?;
    result
}

async fn execute_list(store: &EnvironmentStore, writer: &OutputWriter) -> Result<(), CliError> {
    let environments = store.list().await?;
    let report = EnvironmentList {
        environments: environments.iter().map(EnvironmentSummary::from).collect(),
    };
    writer.render(&report)
}

/// Provisions `spec` and records the result.
///
/// An environment whose record cannot be written is torn down again so that
/// nothing is left running without a handle to it.
pub async fn provision_and_record(
    manager: &HostManager,
    store: &EnvironmentStore,
    spec: &EnvironmentSpec,
) -> Result<Environment, CliError> {
    let env = manager.provision(spec).await?;

    if let Err(e) = store.save(&env).await {
        warn!(env_id = %env.id, error = %e, "failed to record environment, tearing it down");
        if let Err(teardown) = manager.teardown(Some(&env)).await {
            warn!(env_id = %env.id, error = %teardown, "teardown after record failure incomplete");
        }
        return Err(e.into());
    }

    info!(env_id = %env.id, name = %env.name, "environment recorded");
    Ok(env)
}

/// Tears `env` down and deletes its record.
///
/// The record survives a failed teardown unless `force` is set, so the
/// remaining resources can be retried later. The report is returned in
/// both cases; the result carries the teardown failure, if any.
pub async fn release(
    manager: &HostManager,
    store: &EnvironmentStore,
    env: &Environment,
    force: bool,
) -> (DestroyReport, Result<(), CliError>) {
    let teardown = manager.teardown(Some(env)).await;
    let failures = match &teardown {
        Ok(()) => Vec::new(),
        Err(e) => e.failures().iter().map(ToString::to_string).collect(),
    };

    let mut record_deleted = false;
    let mut store_error = None;
    if teardown.is_ok() || force {
        match store.delete(&env.id).await {
            Ok(()) => record_deleted = true,
            Err(e) => store_error = Some(e),
        }
    }

    let report = DestroyReport {
        id: env.id.clone(),
        released: teardown.is_ok(),
        record_deleted,
        failures,
    };
    let result = match (teardown, store_error) {
        (Err(e), _) => Err(e.into()),
        (Ok(()), Some(e)) => Err(e.into()),
        (Ok(()), None) => Ok(()),
    };
    (report, result)
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_owned(), |v| v.to_string())
}

/// One environment record.
#[derive(Serialize)]
#[serde(transparent)]
pub struct EnvironmentReport<'a> {
    env: &'a Environment,
}

impl<'a> From<&'a Environment> for EnvironmentReport<'a> {
    fn from(env: &'a Environment) -> Self {
        Self { env }
    }
}

impl Render for EnvironmentReport<'_> {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let env = self.env;
        writeln!(w, "Environment {}", env.id)?;
        writeln!(w, "  Name:        {}", env.name)?;
        writeln!(w, "  State:       {}", env.state())?;
        writeln!(w, "  Created:     {} (unix)", unix_secs(env.created_at))?;
        writeln!(w, "  Bridge:      {}", opt(env.bridge.as_deref()))?;
        writeln!(w, "  Network:     {}", opt(env.network.as_deref()))?;
        writeln!(w, "  Boot svc:    {}", opt(env.boot_service.as_deref()))?;
        writeln!(w, "  Cluster:     {}", opt(env.cluster.as_deref()))?;
        writeln!(w, "  Deployment:  {}", opt(env.deployment.as_deref()))?;
        writeln!(
            w,
            "  Kubeconfig:  {}",
            opt(env.kubeconfig.as_ref().map(|p| p.display()))
        )?;
        writeln!(
            w,
            "  Work dir:    {}",
            opt(env.work_dir.as_ref().map(|p| p.display()))
        )
    }
}

#[derive(Serialize)]
pub struct EnvironmentSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub created_at: u64,
}

impl From<&Environment> for EnvironmentSummary {
    fn from(env: &Environment) -> Self {
        Self {
            id: env.id.clone(),
            name: env.name.clone(),
            state: env.state().to_string(),
            created_at: unix_secs(env.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct EnvironmentList {
    pub environments: Vec<EnvironmentSummary>,
}

impl Render for EnvironmentList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.environments.is_empty() {
            return writeln!(w, "No environments recorded.");
        }
        writeln!(w, "{:<36} {:<24} {:<14} {:>12}", "ID", "Name", "State", "Created")?;
        writeln!(w, "{}", "-".repeat(89))?;
        for env in &self.environments {
            writeln!(
                w,
                "{:<36} {:<24} {:<14} {:>12}",
                env.id, env.name, env.state, env.created_at
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct DestroyReport {
    pub id: String,
    /// Every resource was released.
    pub released: bool,
    pub record_deleted: bool,
    /// Resources that still need manual attention.
    pub failures: Vec<String>,
}

impl Render for DestroyReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.released {
            writeln!(w, "Environment {} destroyed.", self.id)?;
        } else {
            writeln!(
                w,
                "Environment {} partially destroyed; {} resource(s) need manual cleanup:",
                self.id,
                self.failures.len()
            )?;
            for failure in &self.failures {
                writeln!(w, "  - {failure}")?;
            }
        }
        if !self.record_deleted {
            writeln!(w, "Record kept; rerun `pxelab env destroy {}` to retry.", self.id)?;
        }
        Ok(())
    }
}
