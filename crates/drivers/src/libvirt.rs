//! Boot-target VMs managed through libvirt.
//!
//! VMs are created diskless with `virt-install --pxe`, so the only way they can
//! come up is over the network. Serial console output is written to a file under
//! the driver's console directory and read back for diagnostics.

use std::net::IpAddr;
use std::path::PathBuf;

use pxelab_core::driver::VmDriver;
use pxelab_core::error::DriverError;
use pxelab_core::types::{ResourceKind, VmSpec};
use tracing::{info, warn};

use crate::command::{CommandRunner, validate_name};

const DOMAIN_ABSENT: &[&str] = &["domain not found", "failed to get domain"];
const DOMAIN_INACTIVE: &[&str] = &["domain is not running", "not running"];

/// Extracts the first MAC address from `virsh domiflist` output.
pub fn parse_domiflist(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .skip_while(|l| !l.trim_start().starts_with('-'))
        .skip(1)
        .filter_map(|l| l.split_whitespace().last())
        .find(|mac| mac.matches(':').count() == 5)
        .map(str::to_ascii_lowercase)
}

/// Extracts the first address from `virsh domifaddr` output.
///
/// Rows look like `vnet0  52:54:00:aa:bb:cc  ipv4  10.42.0.101/24`.
pub fn parse_domifaddr(stdout: &str) -> Option<IpAddr> {
    stdout
        .lines()
        .skip_while(|l| !l.trim_start().starts_with('-'))
        .skip(1)
        .filter_map(|l| l.split_whitespace().last())
        .find_map(|cidr| cidr.split('/').next()?.parse().ok())
}

/// Production VM driver backed by `virt-install` and `virsh`.
#[derive(Debug, Clone)]
pub struct VirshVmDriver {
    virsh: CommandRunner,
    virt_install: CommandRunner,
    console_dir: PathBuf,
}

impl VirshVmDriver {
    pub fn new(virsh: CommandRunner, virt_install: CommandRunner, console_dir: impl Into<PathBuf>) -> Self {
        Self {
            virsh,
            virt_install,
            console_dir: console_dir.into(),
        }
    }

    pub fn console_path(&self, name: &str) -> PathBuf {
        self.console_dir.join(format!("{name}.console.log"))
    }
}

impl VmDriver for VirshVmDriver {
    async fn create(&self, name: &str, spec: &VmSpec) -> Result<(), DriverError> {
        validate_name(ResourceKind::Vm, name)?;
        validate_name(ResourceKind::VirtualNetwork, &spec.network)?;
        tokio::fs::create_dir_all(&self.console_dir).await?;

        let memory = spec.memory_mib.to_string();
        let vcpus = spec.vcpus.to_string();
        let network = match &spec.mac {
            Some(mac) => format!("network={},mac={mac}", spec.network),
            None => format!("network={}", spec.network),
        };
        let serial = format!("file,path={}", self.console_path(name).display());

        let out = self
            .virt_install
            .output(
                &[
                    "--name",
                    name,
                    "--memory",
                    &memory,
                    "--vcpus",
                    &vcpus,
                    "--pxe",
                    "--boot",
                    "network",
                    "--disk",
                    "none",
                    "--network",
                    &network,
                    "--serial",
                    &serial,
                    "--osinfo",
                    "detect=on,require=off",
                    "--graphics",
                    "none",
                    "--noautoconsole",
                ],
                None,
            )
            .await?;

        if !out.success {
            if out.stderr_mentions(&["already in use", "already exists"]) {
                return Err(DriverError::AlreadyExists {
                    kind: ResourceKind::Vm,
                    name: name.to_owned(),
                });
            }
            if let Err(cleanup) = self.destroy(name).await {
                warn!(vm = name, error = %cleanup, "failed to remove partially created vm");
            }
            out.into_result()?;
        }

        info!(vm = name, network = %spec.network, "vm created");
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<(), DriverError> {
        validate_name(ResourceKind::Vm, name)?;

        let stopped = self.virsh.output(&["destroy", name], None).await?;
        if !stopped.success
            && !stopped.stderr_mentions(DOMAIN_INACTIVE)
            && !stopped.stderr_mentions(DOMAIN_ABSENT)
        {
            stopped.into_result()?;
        }

        let undefined = self
            .virsh
            .output(&["undefine", name, "--nvram"], None)
            .await?;
        if !undefined.success && !undefined.stderr_mentions(DOMAIN_ABSENT) {
            undefined.into_result()?;
        }

        match tokio::fs::remove_file(self.console_path(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, DriverError> {
        validate_name(ResourceKind::Vm, name)?;
        let out = self.virsh.output(&["dominfo", name], None).await?;
        if out.success {
            Ok(true)
        } else if out.stderr_mentions(DOMAIN_ABSENT) {
            Ok(false)
        } else {
            out.into_result().map(|_| false)
        }
    }

    async fn mac_address(&self, name: &str) -> Result<Option<String>, DriverError> {
        validate_name(ResourceKind::Vm, name)?;
        let out = self.virsh.run(&["domiflist", name]).await?;
        Ok(parse_domiflist(&out.stdout))
    }

    async fn address(&self, name: &str) -> Result<Option<IpAddr>, DriverError> {
        validate_name(ResourceKind::Vm, name)?;
        // The boot service is not libvirt's dnsmasq, so ask the ARP table.
        let out = self
            .virsh
            .output(&["domifaddr", name, "--source", "arp"], None)
            .await?;
        if !out.success {
            return Ok(None);
        }
        Ok(parse_domifaddr(&out.stdout))
    }

    async fn console_log(&self, name: &str) -> Result<String, DriverError> {
        validate_name(ResourceKind::Vm, name)?;
        match tokio::fs::read(self.console_path(name)).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn domiflist_first_mac() {
        let out = "\
 Interface   Type      Source          Model    MAC
--------------------------------------------------------------
 vnet3       network   pxelab-1a2b3c4d virtio   52:54:00:AB:CD:EF
";
        assert_eq!(parse_domiflist(out).as_deref(), Some("52:54:00:ab:cd:ef"));
        assert_eq!(parse_domiflist(""), None);
    }

    #[test]
    fn domifaddr_strips_prefix() {
        let out = "\
 Name       MAC address          Protocol     Address
-------------------------------------------------------------------------------
 vnet3      52:54:00:ab:cd:ef    ipv4         10.42.0.101/24
";
        assert_eq!(
            parse_domifaddr(out),
            Some("10.42.0.101".parse().unwrap())
        );
        let header_only = " Name MAC address Protocol Address\n-----\n";
        assert_eq!(parse_domifaddr(header_only), None);
    }

    #[tokio::test]
    async fn console_log_of_unknown_vm_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let driver = VirshVmDriver::new(
            CommandRunner::new("virsh", Duration::from_secs(1)),
            CommandRunner::new("virt-install", Duration::from_secs(1)),
            dir.path(),
        );
        assert_eq!(driver.console_log("vm-1").await.unwrap(), "");

        tokio::fs::write(driver.console_path("vm-1"), "iPXE initialising devices...\n")
            .await
            .unwrap();
        assert!(driver.console_log("vm-1").await.unwrap().contains("iPXE"));
    }
}
