//! DHCP + TFTP boot service backed by dnsmasq.
//!
//! Each service instance owns three files under the driver's run directory,
//! keyed by the service id:
//!
//! - `<id>.conf`: generated dnsmasq configuration
//! - `<id>.pid`: pid of the daemonized process
//! - `<id>.leases`: DHCP lease database, read by [`DnsmasqBootService::lease_for`]
//!
//! iPXE clients (DHCP option 175) are handed the chainload URL; plain PXE ROMs
//! get the TFTP boot file, which is expected to be an iPXE build.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use pxelab_core::driver::{BootServiceDriver, BootServiceSpec};
use pxelab_core::error::DriverError;
use pxelab_core::types::{Lease, ResourceKind, TargetIdentity};
use tracing::{debug, info, warn};

use crate::command::{CommandRunner, validate_name};

/// TFTP boot file used when the environment names none.
pub const DEFAULT_BOOT_FILE: &str = "undionly.kpxe";

/// Renders the dnsmasq configuration for one service instance.
pub fn render_config(spec: &BootServiceSpec, pid_file: &Path, lease_file: &Path) -> String {
    let boot_file = spec.boot_file.as_deref().unwrap_or(DEFAULT_BOOT_FILE);
    let mut conf = String::new();
    let mut line = |l: String| {
        conf.push_str(&l);
        conf.push('\n');
    };

    line(format!("interface={}", spec.interface));
    line("bind-interfaces".to_owned());
    line("except-interface=lo".to_owned());
    // DNS off; this instance only serves DHCP and TFTP.
    line("port=0".to_owned());
    line(format!("dhcp-range={}", spec.dhcp_range));
    line(format!("dhcp-option=option:router,{}", spec.gateway));
    line(format!("dhcp-leasefile={}", lease_file.display()));
    line(format!("pid-file={}", pid_file.display()));
    line("dhcp-authoritative".to_owned());
    line("log-dhcp".to_owned());
    line("enable-tftp".to_owned());
    line(format!("tftp-root={}", spec.boot_root.display()));
    line("dhcp-match=set:ipxe,175".to_owned());
    match &spec.boot_url {
        Some(url) => {
            line(format!("dhcp-boot=tag:!ipxe,{boot_file}"));
            line(format!("dhcp-boot=tag:ipxe,{url}"));
        }
        None => line(format!("dhcp-boot={boot_file}")),
    }
    conf
}

/// Parses a dnsmasq lease database.
///
/// Each line is `<expiry> <mac> <ip> <hostname|*> <client-id|*>`. Malformed lines
/// are skipped.
pub fn parse_leases(content: &str) -> Vec<Lease> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let expiry = fields.next()?;
            let mac = fields.next()?;
            let address: IpAddr = fields.next()?.parse().ok()?;
            let hostname = fields.next().filter(|h| *h != "*").map(str::to_owned);
            Some(Lease {
                mac: mac.to_ascii_lowercase(),
                address,
                hostname,
                expires_at: expiry.parse().ok().filter(|e| *e != 0),
            })
        })
        .collect()
}

/// Production boot service driver.
#[derive(Debug, Clone)]
pub struct DnsmasqBootService {
    dnsmasq: CommandRunner,
    kill: CommandRunner,
    run_dir: PathBuf,
}

impl DnsmasqBootService {
    /// Creates a driver that keeps runtime files in `run_dir`.
    pub fn new(dnsmasq: CommandRunner, run_dir: impl Into<PathBuf>) -> Self {
        let kill = CommandRunner::new("kill", dnsmasq.timeout());
        Self {
            dnsmasq,
            kill,
            run_dir: run_dir.into(),
        }
    }

    pub fn config_path(&self, id: &str) -> PathBuf {
        self.run_dir.join(format!("{id}.conf"))
    }

    pub fn pid_path(&self, id: &str) -> PathBuf {
        self.run_dir.join(format!("{id}.pid"))
    }

    pub fn lease_path(&self, id: &str) -> PathBuf {
        self.run_dir.join(format!("{id}.leases"))
    }

    async fn read_pid(&self, id: &str) -> Result<Option<u32>, DriverError> {
        match tokio::fs::read_to_string(self.pid_path(id)).await {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_running(pid: u32) -> bool {
        tokio::fs::try_exists(format!("/proc/{pid}"))
            .await
            .unwrap_or(false)
    }

    async fn remove_runtime_files(&self, id: &str) -> Result<(), DriverError> {
        for path in [self.config_path(id), self.pid_path(id), self.lease_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl BootServiceDriver for DnsmasqBootService {
    async fn create(&self, id: &str, spec: &BootServiceSpec) -> Result<(), DriverError> {
        validate_name(ResourceKind::BootService, id)?;
        validate_name(ResourceKind::Bridge, &spec.interface)?;

        if self.exists(id).await? {
            return Err(DriverError::AlreadyExists {
                kind: ResourceKind::BootService,
                name: id.to_owned(),
            });
        }

        tokio::fs::create_dir_all(&self.run_dir).await?;
        tokio::fs::create_dir_all(&spec.boot_root).await?;

        let conf_path = self.config_path(id);
        let conf = render_config(spec, &self.pid_path(id), &self.lease_path(id));
        tokio::fs::write(&conf_path, conf).await?;
        // dnsmasq refuses to start if the lease file cannot be opened.
        tokio::fs::write(self.lease_path(id), b"").await?;

        let conf_arg = format!("--conf-file={}", conf_path.display());
        if let Err(e) = self.dnsmasq.run(&[&conf_arg]).await {
            if let Err(cleanup) = self.remove_runtime_files(id).await {
                warn!(service = id, error = %cleanup, "failed to remove boot service files");
            }
            return Err(e);
        }

        info!(service = id, interface = %spec.interface, "boot service started");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), DriverError> {
        validate_name(ResourceKind::BootService, id)?;

        if let Some(pid) = self.read_pid(id).await? {
            let pid = pid.to_string();
            let out = self.kill.output(&["-TERM", &pid], None).await?;
            if !out.success && !out.stderr_mentions(&["no such process"]) {
                out.into_result()?;
            }
            debug!(service = id, pid = %pid, "boot service terminated");
        }

        self.remove_runtime_files(id).await
    }

    async fn exists(&self, id: &str) -> Result<bool, DriverError> {
        validate_name(ResourceKind::BootService, id)?;
        match self.read_pid(id).await? {
            Some(pid) => Ok(Self::is_running(pid).await),
            None => Ok(false),
        }
    }

    async fn lease_for(
        &self,
        id: &str,
        target: &TargetIdentity,
    ) -> Result<Option<Lease>, DriverError> {
        validate_name(ResourceKind::BootService, id)?;
        let content = match tokio::fs::read_to_string(self.lease_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // dnsmasq appends; the last matching entry is the current one.
        Ok(parse_leases(&content)
            .into_iter()
            .rfind(|lease| target.matches_lease(lease)))
    }
}
