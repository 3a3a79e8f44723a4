//! Command handlers -- one module per subcommand

pub mod certs;
pub mod config;
pub mod env;
pub mod run;
pub mod validate;

use std::sync::Arc;

use pxelab_core::config::PxelabConfig;
use pxelab_drivers::{
    DnsmasqBootService, HostDrivers, HostNetworkDriver, KindClusterDriver, KubectlDeployer,
};
use pxelab_lifecycle::{EnvironmentManager, EnvironmentStore};

use crate::error::CliError;

/// Lifecycle manager over the host drivers.
pub type HostManager =
    EnvironmentManager<HostNetworkDriver, DnsmasqBootService, KindClusterDriver, KubectlDeployer>;

pub fn host_manager(config: &PxelabConfig, drivers: &HostDrivers) -> Result<HostManager, CliError> {
    HostManager::builder()
        .network(Arc::new(drivers.network.clone()))
        .boot_service(Arc::new(drivers.boot.clone()))
        .cluster(Arc::new(drivers.cluster.clone()))
        .deployer(Arc::new(drivers.deploy.clone()))
        .work_root(&config.general.work_root)
        .build()
        .map_err(|e| CliError::Core(e.into()))
}

pub fn environment_store(config: &PxelabConfig) -> EnvironmentStore {
    EnvironmentStore::new(&config.general.state_dir)
}
