//! In-memory lab for tests.
//!
//! [`MemoryLab`] implements every driver trait against shared in-process state,
//! so lifecycle and validation logic can be exercised without root, libvirt or
//! a container runtime. Failures are injected per operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pxelab_core::driver::{
    BootServiceDriver, BootServiceSpec, BridgeSpec, ClusterDriver, DeployDriver, NetworkDriver,
    VirtualNetworkSpec, VmDriver,
};
use pxelab_core::error::DriverError;
use pxelab_core::types::{ClusterSpec, DeploySpec, Lease, ResourceKind, TargetIdentity, VmSpec};

/// Operations that can be observed and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabOp {
    CreateBridge,
    DeleteBridge,
    CreateNetwork,
    DeleteNetwork,
    CreateBootService,
    DeleteBootService,
    CreateCluster,
    DeleteCluster,
    Deploy,
    CreateVm,
    DestroyVm,
}

impl LabOp {
    fn kind(self) -> ResourceKind {
        match self {
            Self::CreateBridge | Self::DeleteBridge => ResourceKind::Bridge,
            Self::CreateNetwork | Self::DeleteNetwork => ResourceKind::VirtualNetwork,
            Self::CreateBootService | Self::DeleteBootService => ResourceKind::BootService,
            Self::CreateCluster | Self::DeleteCluster => ResourceKind::Cluster,
            Self::Deploy => ResourceKind::Deployment,
            Self::CreateVm | Self::DestroyVm => ResourceKind::Vm,
        }
    }
}

#[derive(Debug, Clone)]
struct DhcpScript {
    address: IpAddr,
    after_polls: u32,
}

#[derive(Debug, Default)]
struct LabState {
    bridges: BTreeSet<String>,
    networks: BTreeSet<String>,
    services: BTreeSet<String>,
    clusters: BTreeSet<String>,
    deployments: BTreeSet<String>,
    vms: BTreeMap<String, VmSpec>,
    // remaining failures per op; u32::MAX means always
    failures: HashMap<LabOp, u32>,
    calls: Vec<(LabOp, String)>,
    dhcp: Option<DhcpScript>,
    lease_polls: u32,
    leased: BTreeMap<String, IpAddr>,
    arp_address: Option<IpAddr>,
    console: String,
    next_mac: u8,
}

impl LabState {
    fn enter(&mut self, op: LabOp, name: &str) -> Result<(), DriverError> {
        self.calls.push((op, name.to_owned()));
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                Err(DriverError::Failed {
                    kind: op.kind(),
                    name: name.to_owned(),
                    reason: "injected failure".to_owned(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Shared in-memory implementation of all driver traits.
///
/// Cloning shares state, so a test can hand clones to a manager and still
/// inspect what was created.
#[derive(Debug, Clone, Default)]
pub struct MemoryLab {
    state: Arc<Mutex<LabState>>,
}

impl MemoryLab {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LabState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call of `op` fail.
    pub fn fail(self, op: LabOp) -> Self {
        self.state().failures.insert(op, u32::MAX);
        self
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_times(self, op: LabOp, times: u32) -> Self {
        self.state().failures.insert(op, times);
        self
    }

    /// Stops injecting failures for `op`.
    pub fn heal(&self, op: LabOp) {
        self.state().failures.remove(&op);
    }

    /// Hands out `address` to a booting VM once `after_polls` lease queries have
    /// come back empty.
    pub fn with_dhcp(self, address: IpAddr, after_polls: u32) -> Self {
        self.state().dhcp = Some(DhcpScript {
            address,
            after_polls,
        });
        self
    }

    /// Address the hypervisor reports for any running VM, lease or not.
    pub fn with_vm_address(self, address: IpAddr) -> Self {
        self.state().arp_address = Some(address);
        self
    }

    /// Console output returned for every VM.
    pub fn with_console_log(self, log: impl Into<String>) -> Self {
        self.state().console = log.into();
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(LabOp, String)> {
        self.state().calls.clone()
    }

    /// Number of calls made for `op`.
    pub fn count(&self, op: LabOp) -> usize {
        self.state().calls.iter().filter(|(o, _)| *o == op).count()
    }

    pub fn bridges(&self) -> Vec<String> {
        self.state().bridges.iter().cloned().collect()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state().networks.iter().cloned().collect()
    }

    pub fn services(&self) -> Vec<String> {
        self.state().services.iter().cloned().collect()
    }

    pub fn clusters(&self) -> Vec<String> {
        self.state().clusters.iter().cloned().collect()
    }

    pub fn deployments(&self) -> Vec<String> {
        self.state().deployments.iter().cloned().collect()
    }

    pub fn vms(&self) -> Vec<String> {
        self.state().vms.keys().cloned().collect()
    }

    /// Total number of live resources of any kind.
    pub fn live_resources(&self) -> usize {
        let s = self.state();
        s.bridges.len()
            + s.networks.len()
            + s.services.len()
            + s.clusters.len()
            + s.deployments.len()
            + s.vms.len()
    }
}

fn already_exists(kind: ResourceKind, name: &str) -> DriverError {
    DriverError::AlreadyExists {
        kind,
        name: name.to_owned(),
    }
}

impl NetworkDriver for MemoryLab {
    async fn create_bridge(&self, spec: &BridgeSpec) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::CreateBridge, &spec.name)?;
        if !s.bridges.insert(spec.name.clone()) {
            return Err(already_exists(ResourceKind::Bridge, &spec.name));
        }
        Ok(())
    }

    async fn delete_bridge(&self, name: &str) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::DeleteBridge, name)?;
        s.bridges.remove(name);
        Ok(())
    }

    async fn bridge_exists(&self, name: &str) -> Result<bool, DriverError> {
        Ok(self.state().bridges.contains(name))
    }

    async fn create_network(&self, spec: &VirtualNetworkSpec) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::CreateNetwork, &spec.name)?;
        if !s.bridges.contains(&spec.bridge) {
            return Err(DriverError::NotFound {
                kind: ResourceKind::Bridge,
                name: spec.bridge.clone(),
            });
        }
        if !s.networks.insert(spec.name.clone()) {
            return Err(already_exists(ResourceKind::VirtualNetwork, &spec.name));
        }
        Ok(())
    }

    async fn delete_network(&self, name: &str) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::DeleteNetwork, name)?;
        s.networks.remove(name);
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, DriverError> {
        Ok(self.state().networks.contains(name))
    }
}

impl BootServiceDriver for MemoryLab {
    async fn create(&self, id: &str, spec: &BootServiceSpec) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::CreateBootService, id)?;
        if !s.bridges.contains(&spec.interface) {
            return Err(DriverError::NotFound {
                kind: ResourceKind::Bridge,
                name: spec.interface.clone(),
            });
        }
        if !s.services.insert(id.to_owned()) {
            return Err(already_exists(ResourceKind::BootService, id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::DeleteBootService, id)?;
        s.services.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, DriverError> {
        Ok(self.state().services.contains(id))
    }

    async fn lease_for(
        &self,
        _id: &str,
        target: &TargetIdentity,
    ) -> Result<Option<Lease>, DriverError> {
        let mut s = self.state();
        let Some(script) = s.dhcp.clone() else {
            return Ok(None);
        };
        let Some(vm) = s.vms.get(&target.name).cloned() else {
            return Ok(None);
        };
        if s.lease_polls < script.after_polls {
            s.lease_polls += 1;
            return Ok(None);
        }
        s.leased.insert(target.name.clone(), script.address);
        Ok(Some(Lease {
            mac: vm.mac.unwrap_or_default(),
            address: script.address,
            hostname: Some(target.name.clone()),
            expires_at: None,
        }))
    }
}

impl ClusterDriver for MemoryLab {
    async fn create(&self, spec: &ClusterSpec, _kubeconfig: &Path) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::CreateCluster, &spec.name)?;
        if !s.clusters.insert(spec.name.clone()) {
            return Err(already_exists(ResourceKind::Cluster, &spec.name));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::DeleteCluster, name)?;
        s.clusters.remove(name);
        let prefix = format!("{name}/");
        s.deployments.retain(|d| !d.starts_with(&prefix));
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, DriverError> {
        Ok(self.state().clusters.contains(name))
    }
}

impl DeployDriver for MemoryLab {
    async fn deploy(
        &self,
        cluster: &str,
        _kubeconfig: &Path,
        spec: &DeploySpec,
    ) -> Result<(), DriverError> {
        let mut s = self.state();
        let id = format!("{cluster}/{}/{}", spec.namespace, spec.service);
        s.enter(LabOp::Deploy, &id)?;
        if !s.clusters.contains(cluster) {
            return Err(DriverError::NotFound {
                kind: ResourceKind::Cluster,
                name: cluster.to_owned(),
            });
        }
        s.deployments.insert(id);
        Ok(())
    }
}

impl VmDriver for MemoryLab {
    async fn create(&self, name: &str, spec: &VmSpec) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::CreateVm, name)?;
        if s.vms.contains_key(name) {
            return Err(already_exists(ResourceKind::Vm, name));
        }
        let mut spec = spec.clone();
        if spec.mac.is_none() {
            s.next_mac = s.next_mac.wrapping_add(1);
            spec.mac = Some(format!("52:54:00:00:00:{:02x}", s.next_mac));
        }
        s.vms.insert(name.to_owned(), spec);
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<(), DriverError> {
        let mut s = self.state();
        s.enter(LabOp::DestroyVm, name)?;
        s.vms.remove(name);
        s.leased.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, DriverError> {
        Ok(self.state().vms.contains_key(name))
    }

    async fn mac_address(&self, name: &str) -> Result<Option<String>, DriverError> {
        Ok(self.state().vms.get(name).and_then(|vm| vm.mac.clone()))
    }

    async fn address(&self, name: &str) -> Result<Option<IpAddr>, DriverError> {
        let s = self.state();
        let seen = s.vms.contains_key(name).then_some(s.arp_address).flatten();
        Ok(s.leased.get(name).copied().or(seen))
    }

    async fn console_log(&self, name: &str) -> Result<String, DriverError> {
        let s = self.state();
        if !s.vms.contains_key(name) {
            return Err(DriverError::NotFound {
                kind: ResourceKind::Vm,
                name: name.to_owned(),
            });
        }
        Ok(s.console.clone())
    }
}
