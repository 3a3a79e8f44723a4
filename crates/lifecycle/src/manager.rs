//! 환경 관리자 — 격리된 부트 테스트 환경의 생성과 해제
//!
//! [`EnvironmentManager`]는 명세 하나를 받아 다음 순서로 리소스를 만듭니다.
//!
//! ```text
//! workspace ─► bridge ─► virtual network ─► boot service ─► cluster ─► deployment
//! ```
//!
//! 어느 단계에서든 실패하면 그때까지 만든 리소스를 역순으로 정리한 뒤 실패한
//! 단계와 원래 원인을 반환합니다. 호출자에게는 완성된 환경 또는 에러만 보이며,
//! 일부만 생성된 환경이 남지 않습니다.
//!
//! 해제는 채워진 핸들만 역순으로 정리하고, 하나가 실패해도 나머지를 계속
//! 시도한 뒤 실패를 모아 [`TeardownError`]로 보고합니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use pxelab_core::driver::{
    BootServiceDriver, BootServiceSpec, BridgeSpec, ClusterDriver, DeployDriver, NetworkDriver,
    VirtualNetworkSpec,
};
use pxelab_core::error::{ConfigError, DriverError};
use pxelab_core::metrics as m;
use pxelab_core::types::{Environment, EnvironmentSpec, Ipv4Cidr, ResourceKind};
use tracing::{debug, error, info, warn};

use crate::error::{ProvisionError, ProvisionStep, TeardownError, TeardownFailure};

/// 가상 네트워크 이름 접두어
pub const NETWORK_PREFIX: &str = "pxelab-";

/// 작업 디렉토리 안의 TFTP 루트 이름
pub const BOOT_ROOT_DIR: &str = "tftp";

/// 작업 디렉토리 안의 클러스터 접속 정보 파일 이름
pub const KUBECONFIG_FILE: &str = "kubeconfig";

/// 환경 관리자
///
/// 드라이버는 `Arc`로 공유되므로 같은 드라이버 인스턴스를 검증기나 다른 관리자와
/// 함께 사용할 수 있습니다.
pub struct EnvironmentManager<N, B, C, D> {
    network: Arc<N>,
    boot: Arc<B>,
    cluster: Arc<C>,
    deploy: Arc<D>,
    work_root: PathBuf,
}

impl<N, B, C, D> EnvironmentManager<N, B, C, D>
where
    N: NetworkDriver,
    B: BootServiceDriver,
    C: ClusterDriver,
    D: DeployDriver,
{
    /// 빌더를 생성합니다.
    pub fn builder() -> EnvironmentManagerBuilder<N, B, C, D> {
        EnvironmentManagerBuilder::new()
    }

    /// 환경별 작업 디렉토리 루트
    pub fn work_root(&self) -> &std::path::Path {
        &self.work_root
    }

    /// 명세에 따라 환경을 생성합니다.
    ///
    /// 명세가 유효하지 않으면 아무 리소스도 만들지 않고 [`ProvisionError::Invalid`]를
    /// 반환합니다. 단계가 실패하면 롤백 후 [`ProvisionError::Step`]을 반환합니다.
    pub async fn provision(&self, spec: &EnvironmentSpec) -> Result<Environment, ProvisionError> {
        spec.validate()?;
        let cidr = spec.cidr()?;

        let started = Instant::now();
        counter!(m::ENV_PROVISION_TOTAL).increment(1);

        let mut env = Environment::new(spec.clone());
        info!(env_id = %env.id, name = %env.name, "provisioning environment");

        match self.run_steps(&mut env, cidr).await {
            Ok(()) => {
                histogram!(m::ENV_PROVISION_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                info!(
                    env_id = %env.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "environment ready"
                );
                Ok(env)
            }
            Err((step, source)) => {
                counter!(m::ENV_PROVISION_FAILURES_TOTAL, m::LABEL_STEP => step.label())
                    .increment(1);
                error!(
                    env_id = %env.id,
                    step = %step,
                    error = %source,
                    "provisioning failed, rolling back"
                );

                let rollback = match self.teardown(Some(&env)).await {
                    Ok(()) => None,
                    Err(rollback_err) => {
                        error!(
                            env_id = %env.id,
                            startup_error = %source,
                            rollback_error = %rollback_err,
                            "rollback incomplete"
                        );
                        Some(rollback_err)
                    }
                };

                Err(ProvisionError::Step {
                    step,
                    source,
                    rollback,
                })
            }
        }
    }

    /// 단계를 순서대로 실행합니다. 각 리소스의 핸들은 생성에 성공한 직후에만 채웁니다.
    async fn run_steps(
        &self,
        env: &mut Environment,
        cidr: Ipv4Cidr,
    ) -> Result<(), (ProvisionStep, DriverError)> {
        let spec = env.spec.clone();

        // 1. 작업 디렉토리
        let work_dir = self.work_root.join(&env.id);
        let boot_root = work_dir.join(BOOT_ROOT_DIR);
        tokio::fs::create_dir_all(&boot_root)
            .await
            .map_err(|e| (ProvisionStep::AllocateWorkspace, DriverError::Io(e)))?;
        env.work_dir = Some(work_dir.clone());
        env.boot_root = Some(boot_root.clone());
        debug!(env_id = %env.id, path = %work_dir.display(), "workspace allocated");

        // 2. 브리지
        let bridge = BridgeSpec {
            name: spec.network.bridge.clone(),
            address: cidr.gateway(),
            prefix: cidr.prefix(),
        };
        self.network
            .create_bridge(&bridge)
            .await
            .map_err(|e| (ProvisionStep::CreateBridge, e))?;
        env.bridge = Some(bridge.name.clone());

        // 3. 가상 네트워크
        let network = VirtualNetworkSpec {
            name: format!("{NETWORK_PREFIX}{}", env.short_id()),
            bridge: bridge.name.clone(),
        };
        self.network
            .create_network(&network)
            .await
            .map_err(|e| (ProvisionStep::CreateNetwork, e))?;
        env.network = Some(network.name);

        // 4. 부트 서비스
        let service_id = env.id.clone();
        let service = BootServiceSpec {
            interface: bridge.name.clone(),
            dhcp_range: spec.network.dhcp_range.clone(),
            gateway: cidr.gateway(),
            boot_root,
            boot_url: spec.network.boot_url.clone(),
            boot_file: spec.network.boot_file.clone(),
        };
        self.boot
            .create(&service_id, &service)
            .await
            .map_err(|e| (ProvisionStep::StartBootService, e))?;
        env.boot_service = Some(service_id);

        // 5. 클러스터
        let kubeconfig = work_dir.join(KUBECONFIG_FILE);
        self.cluster
            .create(&spec.cluster, &kubeconfig)
            .await
            .map_err(|e| (ProvisionStep::CreateCluster, e))?;
        env.cluster = Some(spec.cluster.name.clone());
        env.kubeconfig = Some(kubeconfig.clone());

        // 6. 배포
        self.deploy
            .deploy(&spec.cluster.name, &kubeconfig, &spec.deploy)
            .await
            .map_err(|e| (ProvisionStep::DeployService, e))?;
        env.deployment = Some(format!("{}/{}", spec.deploy.namespace, spec.deploy.service));

        Ok(())
    }

    /// 환경을 해제합니다.
    ///
    /// `None`은 해제할 것이 없는 것으로 보고 즉시 성공합니다. 이미 없는 리소스는
    /// 성공으로 취급하므로 같은 환경을 두 번 해제해도 안전합니다.
    pub async fn teardown(&self, env: Option<&Environment>) -> Result<(), TeardownError> {
        let Some(env) = env else {
            debug!("teardown requested for absent environment, nothing to do");
            return Ok(());
        };

        info!(env_id = %env.id, state = %env.state(), "tearing down environment");
        let mut failures = Vec::new();

        // 배포는 클러스터와 함께 제거됩니다.
        if let Some(deployment) = &env.deployment
            && env.cluster.is_none()
        {
            warn!(env_id = %env.id, deployment = %deployment, "deployment has no cluster handle, skipping");
        }

        if let Some(cluster) = &env.cluster {
            let result = self.cluster.delete(cluster).await;
            note(&mut failures, ResourceKind::Cluster, cluster, result);
        }

        if let Some(service) = &env.boot_service {
            let result = self.boot.delete(service).await;
            note(&mut failures, ResourceKind::BootService, service, result);
        }

        if let Some(network) = &env.network {
            let result = self.network.delete_network(network).await;
            note(&mut failures, ResourceKind::VirtualNetwork, network, result);
        }

        if let Some(bridge) = &env.bridge {
            let result = self.network.delete_bridge(bridge).await;
            note(&mut failures, ResourceKind::Bridge, bridge, result);
        }

        if let Some(work_dir) = &env.work_dir {
            let result = tokio::fs::remove_dir_all(work_dir)
                .await
                .map_err(DriverError::Io);
            note(
                &mut failures,
                ResourceKind::Workspace,
                &work_dir.display().to_string(),
                result,
            );
        }

        if failures.is_empty() {
            info!(env_id = %env.id, "environment torn down");
            Ok(())
        } else {
            Err(TeardownError::new(failures))
        }
    }
}

/// 해제 결과를 기록합니다. 이미 없는 리소스는 성공입니다.
fn note(
    failures: &mut Vec<TeardownFailure>,
    kind: ResourceKind,
    name: &str,
    result: Result<(), DriverError>,
) {
    match result {
        Ok(()) => debug!(resource = %kind, name, "released"),
        Err(e) if e.is_not_found() => debug!(resource = %kind, name, "already gone"),
        Err(e) => {
            warn!(resource = %kind, name, error = %e, "failed to release resource");
            counter!(m::ENV_TEARDOWN_FAILURES_TOTAL, m::LABEL_RESOURCE => kind.to_string())
                .increment(1);
            failures.push(TeardownFailure {
                kind,
                name: name.to_owned(),
                reason: e.to_string(),
            });
        }
    }
}

/// [`EnvironmentManager`] 빌더
pub struct EnvironmentManagerBuilder<N, B, C, D> {
    network: Option<Arc<N>>,
    boot: Option<Arc<B>>,
    cluster: Option<Arc<C>>,
    deploy: Option<Arc<D>>,
    work_root: Option<PathBuf>,
}

impl<N, B, C, D> Default for EnvironmentManagerBuilder<N, B, C, D> {
    fn default() -> Self {
        Self {
            network: None,
            boot: None,
            cluster: None,
            deploy: None,
            work_root: None,
        }
    }
}

impl<N, B, C, D> EnvironmentManagerBuilder<N, B, C, D>
where
    N: NetworkDriver,
    B: BootServiceDriver,
    C: ClusterDriver,
    D: DeployDriver,
{
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 네트워크 드라이버를 설정합니다.
    pub fn network(mut self, driver: Arc<N>) -> Self {
        self.network = Some(driver);
        self
    }

    /// 부트 서비스 드라이버를 설정합니다.
    pub fn boot_service(mut self, driver: Arc<B>) -> Self {
        self.boot = Some(driver);
        self
    }

    /// 클러스터 드라이버를 설정합니다.
    pub fn cluster(mut self, driver: Arc<C>) -> Self {
        self.cluster = Some(driver);
        self
    }

    /// 배포 드라이버를 설정합니다.
    pub fn deployer(mut self, driver: Arc<D>) -> Self {
        self.deploy = Some(driver);
        self
    }

    /// 작업 디렉토리 루트를 설정합니다.
    pub fn work_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_root = Some(path.into());
        self
    }

    /// 관리자를 빌드합니다.
    pub fn build(self) -> Result<EnvironmentManager<N, B, C, D>, ConfigError> {
        fn missing(field: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_owned(),
                reason: "must be provided".to_owned(),
            }
        }

        let work_root = self.work_root.ok_or_else(|| missing("work_root"))?;
        if work_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "work_root".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        Ok(EnvironmentManager {
            network: self.network.ok_or_else(|| missing("network"))?,
            boot: self.boot.ok_or_else(|| missing("boot_service"))?,
            cluster: self.cluster.ok_or_else(|| missing("cluster"))?,
            deploy: self.deploy.ok_or_else(|| missing("deployer"))?,
            work_root,
        })
    }
}
