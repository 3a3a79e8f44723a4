//! Linux bridge and libvirt virtual network driver.
//!
//! Bridges are managed with iproute2 (`ip link`, `ip addr`). The virtual network
//! is a libvirt network in `forward mode='bridge'` pointing at that bridge, so VMs
//! attached to it land on the same L2 segment as the boot service.

use pxelab_core::driver::{BridgeSpec, NetworkDriver, VirtualNetworkSpec};
use pxelab_core::error::DriverError;
use pxelab_core::types::ResourceKind;
use tracing::{info, warn};

use crate::command::{CommandRunner, validate_name};

const BRIDGE_ABSENT: &[&str] = &["cannot find device", "does not exist"];
const BRIDGE_PRESENT: &[&str] = &["file exists"];
const NETWORK_ABSENT: &[&str] = &["network not found", "no network with matching name"];
const NETWORK_INACTIVE: &[&str] = &["not active", "is not running"];
const NETWORK_PRESENT: &[&str] = &["already exists"];

/// Renders the libvirt network definition for a bridged network.
pub fn network_xml(spec: &VirtualNetworkSpec) -> String {
    format!(
        "<network>\n  <name>{}</name>\n  <forward mode='bridge'/>\n  <bridge name='{}'/>\n</network>\n",
        spec.name, spec.bridge
    )
}

/// Production network driver backed by `ip` and `virsh`.
#[derive(Debug, Clone)]
pub struct HostNetworkDriver {
    ip: CommandRunner,
    virsh: CommandRunner,
}

impl HostNetworkDriver {
    pub fn new(ip: CommandRunner, virsh: CommandRunner) -> Self {
        Self { ip, virsh }
    }

    async fn define_and_start(&self, spec: &VirtualNetworkSpec) -> Result<(), DriverError> {
        let defined = self
            .virsh
            .output(&["net-define", "/dev/stdin"], Some(&network_xml(spec)))
            .await?;
        if !defined.success {
            if defined.stderr_mentions(NETWORK_PRESENT) {
                return Err(DriverError::AlreadyExists {
                    kind: ResourceKind::VirtualNetwork,
                    name: spec.name.clone(),
                });
            }
            defined.into_result()?;
        }

        if let Err(e) = self.virsh.run(&["net-start", &spec.name]).await {
            // Leave nothing behind when the step fails half way.
            if let Err(undefine) = self.virsh.run(&["net-undefine", &spec.name]).await {
                warn!(network = %spec.name, error = %undefine, "failed to undefine network after start failure");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl NetworkDriver for HostNetworkDriver {
    async fn create_bridge(&self, spec: &BridgeSpec) -> Result<(), DriverError> {
        validate_name(ResourceKind::Bridge, &spec.name)?;

        let added = self
            .ip
            .output(&["link", "add", "name", &spec.name, "type", "bridge"], None)
            .await?;
        if !added.success {
            if added.stderr_mentions(BRIDGE_PRESENT) {
                return Err(DriverError::AlreadyExists {
                    kind: ResourceKind::Bridge,
                    name: spec.name.clone(),
                });
            }
            added.into_result()?;
        }

        let cidr = format!("{}/{}", spec.address, spec.prefix);
        let configured = async {
            self.ip
                .run(&["addr", "add", &cidr, "dev", &spec.name])
                .await?;
            self.ip.run(&["link", "set", &spec.name, "up"]).await
        }
        .await;

        if let Err(e) = configured {
            if let Err(cleanup) = self.delete_bridge(&spec.name).await {
                warn!(bridge = %spec.name, error = %cleanup, "failed to remove half-configured bridge");
            }
            return Err(e);
        }

        info!(bridge = %spec.name, address = %cidr, "bridge created");
        Ok(())
    }

    async fn delete_bridge(&self, name: &str) -> Result<(), DriverError> {
        validate_name(ResourceKind::Bridge, name)?;
        let out = self
            .ip
            .output(&["link", "delete", name, "type", "bridge"], None)
            .await?;
        if out.success || out.stderr_mentions(BRIDGE_ABSENT) {
            return Ok(());
        }
        out.into_result().map(|_| ())
    }

    async fn bridge_exists(&self, name: &str) -> Result<bool, DriverError> {
        validate_name(ResourceKind::Bridge, name)?;
        let out = self.ip.output(&["link", "show", name], None).await?;
        if out.success {
            Ok(true)
        } else if out.stderr_mentions(BRIDGE_ABSENT) {
            Ok(false)
        } else {
            out.into_result().map(|_| false)
        }
    }

    async fn create_network(&self, spec: &VirtualNetworkSpec) -> Result<(), DriverError> {
        validate_name(ResourceKind::VirtualNetwork, &spec.name)?;
        validate_name(ResourceKind::Bridge, &spec.bridge)?;
        self.define_and_start(spec).await?;
        info!(network = %spec.name, bridge = %spec.bridge, "virtual network started");
        Ok(())
    }

    async fn delete_network(&self, name: &str) -> Result<(), DriverError> {
        validate_name(ResourceKind::VirtualNetwork, name)?;

        let stopped = self.virsh.output(&["net-destroy", name], None).await?;
        if !stopped.success && !stopped.stderr_mentions(NETWORK_INACTIVE) {
            if stopped.stderr_mentions(NETWORK_ABSENT) {
                return Ok(());
            }
            stopped.into_result()?;
        }

        let undefined = self.virsh.output(&["net-undefine", name], None).await?;
        if undefined.success || undefined.stderr_mentions(NETWORK_ABSENT) {
            return Ok(());
        }
        undefined.into_result().map(|_| ())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, DriverError> {
        validate_name(ResourceKind::VirtualNetwork, name)?;
        let out = self.virsh.output(&["net-info", name], None).await?;
        if out.success {
            Ok(true)
        } else if out.stderr_mentions(NETWORK_ABSENT) {
            Ok(false)
        } else {
            out.into_result().map(|_| false)
        }
    }
}
