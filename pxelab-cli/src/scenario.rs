//! Scenario files
//!
//! A scenario describes one environment and one boot attempt against it:
//!
//! ```yaml
//! name: rocky9-pxe
//! environment:
//!   network:
//!     bridge: pxebr0
//!     cidr: 10.42.0.0/24
//!     dhcp_range: 10.42.0.100,10.42.0.200
//!     boot_url: http://10.42.0.1:8080/boot.ipxe
//!   cluster:
//!     name: pxelab
//!   deploy:
//!     namespace: pxe-system
//!     service: pxe-server
//!     port: 8080
//! boot:
//!   target: vm-1
//!   timeouts:
//!     lease_secs: 45
//!   expect:
//!     profile: rocky9
//! ```
//!
//! The environment spec itself is validated by the lifecycle manager when it
//! is provisioned; loading only checks what the CLI needs to get there.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pxelab_core::config::ValidationConfig;
use pxelab_core::types::{EnvironmentSpec, SelectionExpectation};
use pxelab_validate::RunConfig;

use crate::error::CliError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub environment: EnvironmentSpec,
    pub boot: BootSection,
}

/// The `boot` section: which virtual client to boot and what to expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootSection {
    pub target: String,
    pub mac: Option<String>,
    pub memory_mib: Option<u32>,
    pub vcpus: Option<u32>,
    pub timeouts: TimeoutOverrides,
    pub expect: Option<SelectionExpectation>,
}

/// Per-scenario overrides of the `[validation]` timeouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutOverrides {
    pub boot_secs: Option<u64>,
    pub lease_secs: Option<u64>,
    pub callback_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl Scenario {
    pub async fn load(path: &Path) -> Result<Self, CliError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CliError::Scenario(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
            .map_err(|e| CliError::Scenario(format!("{}: {e}", path.display())))
    }

    /// Parses and checks a scenario document.
    ///
    /// An empty environment name is filled in from the scenario name.
    pub fn parse(yaml: &str) -> Result<Self, String> {
        let mut scenario: Self = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
        if scenario.name.trim().is_empty() {
            return Err("scenario name must not be empty".to_owned());
        }
        if scenario.boot.target.trim().is_empty() {
            return Err("boot.target must not be empty".to_owned());
        }
        if scenario.environment.name.is_empty() {
            scenario.environment.name = scenario.name.clone();
        }
        Ok(scenario)
    }
}

impl BootSection {
    /// Builds the validator input for a VM attached to `network`.
    ///
    /// Values not set in the scenario come from the `[validation]` section.
    pub fn run_config(&self, defaults: &ValidationConfig, network: &str) -> RunConfig {
        let mut config = RunConfig::from_core(defaults, &self.target, network);
        config.vm.mac = self.mac.clone();
        if let Some(memory) = self.memory_mib {
            config.vm.memory_mib = memory;
        }
        if let Some(vcpus) = self.vcpus {
            config.vm.vcpus = vcpus;
        }
        let t = &self.timeouts;
        if let Some(secs) = t.boot_secs {
            config.boot_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = t.lease_secs {
            config.lease_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = t.callback_secs {
            config.callback_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = t.poll_interval_ms {
            config.poll_interval = Some(Duration::from_millis(ms));
        }
        config.expect = self.expect.clone();
        config
    }
}
