//! pxelab host drivers.
//!
//! Production implementations of the driver traits from `pxelab-core`:
//!
//! | Trait | Implementation | Tooling |
//! |-------|----------------|---------|
//! | `NetworkDriver` | [`HostNetworkDriver`] | `ip`, `virsh net-*` |
//! | `BootServiceDriver` | [`DnsmasqBootService`] | `dnsmasq` |
//! | `ClusterDriver` | [`KindClusterDriver`] | `kind` |
//! | `DeployDriver` | [`KubectlDeployer`] | `kubectl`, `kind load` |
//! | `VmDriver` | [`VirshVmDriver`] | `virt-install`, `virsh` |
//! | `CertificateIssuer` | [`RcgenIssuer`] | `rcgen` |
//!
//! With the `testing` feature, `memory::MemoryLab` implements all of them in memory.

pub mod certs;
pub mod command;
pub mod dnsmasq;
pub mod kind;
pub mod kubectl;
pub mod libvirt;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod network;

use std::path::PathBuf;

use pxelab_core::config::DriversConfig;

pub use certs::RcgenIssuer;
pub use command::{CommandOutput, CommandRunner};
pub use dnsmasq::DnsmasqBootService;
pub use kind::KindClusterDriver;
pub use kubectl::KubectlDeployer;
pub use libvirt::VirshVmDriver;
pub use network::HostNetworkDriver;

/// The full set of production drivers built from one config section.
#[derive(Debug, Clone)]
pub struct HostDrivers {
    pub network: HostNetworkDriver,
    pub boot: DnsmasqBootService,
    pub cluster: KindClusterDriver,
    pub deploy: KubectlDeployer,
    pub vm: VirshVmDriver,
}

impl HostDrivers {
    pub fn from_config(config: &DriversConfig) -> Self {
        let timeout = config.command_timeout();
        let runner = |bin: &str| CommandRunner::new(bin, timeout);
        let virsh = runner(&config.virsh_bin).with_base_args(["-c", config.libvirt_uri.as_str()]);
        let virt_install =
            runner(&config.virt_install_bin).with_base_args(["--connect", config.libvirt_uri.as_str()]);
        let run_dir = PathBuf::from(&config.run_dir);

        Self {
            network: HostNetworkDriver::new(runner(&config.ip_bin), virsh.clone()),
            boot: DnsmasqBootService::new(runner(&config.dnsmasq_bin), run_dir.join("dnsmasq")),
            cluster: KindClusterDriver::new(runner(&config.kind_bin)),
            deploy: KubectlDeployer::new(runner(&config.kubectl_bin), runner(&config.kind_bin)),
            vm: VirshVmDriver::new(virsh, virt_install, run_dir.join("console")),
        }
    }
}
