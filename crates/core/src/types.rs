//! 도메인 타입 — 크레이트 전역에서 사용되는 공통 타입
//!
//! 환경 명세([`EnvironmentSpec`]), 프로비저닝된 환경 레코드([`Environment`]),
//! 부트 시도 결과([`BootAttempt`]) 등 모든 크레이트가 주고받는 데이터 구조를 정의합니다.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// 리눅스 인터페이스 이름 최대 길이 (IFNAMSIZ - 1)
pub const MAX_BRIDGE_NAME_LEN: usize = 15;

/// 환경 ID 축약 길이 (리소스 이름 접미어로 사용)
pub const SHORT_ID_LEN: usize = 8;

// ─── 리소스 종류 ────────────────────────────────────────────────────

/// 호스트/클러스터 리소스 종류
///
/// 에러 메시지와 해제 실패 집계에서 어떤 리소스가 문제였는지 표시합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// 작업 디렉토리 (부트 루트, kubeconfig 등)
    Workspace,
    /// 리눅스 브리지
    Bridge,
    /// libvirt 가상 네트워크
    VirtualNetwork,
    /// DHCP/TFTP 부트 서비스
    BootService,
    /// 로컬 쿠버네티스 클러스터
    Cluster,
    /// 클러스터 내부 배포
    Deployment,
    /// 부트 대상 VM
    Vm,
    /// TLS 인증서
    Certificate,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workspace => "workspace",
            Self::Bridge => "bridge",
            Self::VirtualNetwork => "virtual network",
            Self::BootService => "boot service",
            Self::Cluster => "cluster",
            Self::Deployment => "deployment",
            Self::Vm => "vm",
            Self::Certificate => "certificate",
        };
        f.write_str(name)
    }
}

// ─── IPv4 CIDR ──────────────────────────────────────────────────────

/// IPv4 네트워크 주소 범위 (`10.42.0.0/24`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// 네트워크 주소 (호스트 비트는 0으로 정규화됨)
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// 프리픽스 길이
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// 넷마스크
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask_bits(self.prefix))
    }

    /// 게이트웨이 주소 (첫 번째 호스트 주소)
    ///
    /// 브리지 인터페이스에 할당되고 DHCP 응답의 라우터 옵션으로 광고됩니다.
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network).saturating_add(1))
    }

    /// 주소가 이 범위에 속하는지 확인합니다.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = mask_bits(self.prefix);
        u32::from(addr) & mask == u32::from(self.network)
    }
}

fn mask_bits(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' is not in address/prefix form"))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| format!("'{addr}' is not an IPv4 address"))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| format!("'{prefix}' is not a prefix length"))?;
        // /31, /32 는 게이트웨이와 DHCP 범위를 둘 수 없음
        if !(1..=30).contains(&prefix) {
            return Err(format!("prefix length {prefix} must be between 1 and 30"));
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask_bits(prefix));
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

// ─── 환경 명세 ──────────────────────────────────────────────────────

/// 환경 명세
///
/// 하나의 격리된 부트 테스트 환경(브리지, 가상 네트워크, 부트 서비스,
/// 클러스터, 배포)을 기술합니다. 시나리오 파일에서 읽어 들입니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSpec {
    /// 환경 이름 (사람이 읽는 용도)
    pub name: String,
    /// 네트워크 설정
    pub network: NetworkSpec,
    /// 클러스터 설정
    pub cluster: ClusterSpec,
    /// 배포 설정
    pub deploy: DeploySpec,
}

/// 네트워크 명세
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    /// 생성할 브리지 이름
    pub bridge: String,
    /// 네트워크 주소 범위 (`10.42.0.0/24`)
    pub cidr: String,
    /// DHCP 할당 범위 (`10.42.0.100,10.42.0.200`)
    pub dhcp_range: String,
    /// iPXE 체인로드 URL (없으면 순수 TFTP 부트)
    pub boot_url: Option<String>,
    /// TFTP 부트 파일 이름
    pub boot_file: Option<String>,
}

/// 클러스터 명세
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    /// 클러스터 이름
    pub name: String,
    /// 노드 이미지 (없으면 드라이버 기본값)
    pub node_image: Option<String>,
}

/// 배포 명세
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySpec {
    /// 배포 대상 네임스페이스
    pub namespace: String,
    /// 서비스 이름 (터널 대상)
    pub service: String,
    /// 컨테이너 이미지 (kind 클러스터에 미리 로드)
    pub image: Option<String>,
    /// 적용할 매니페스트 경로
    pub manifest: Option<PathBuf>,
    /// 서비스 포트
    pub port: u16,
}

impl Default for DeploySpec {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            service: "pxe-server".to_owned(),
            image: None,
            manifest: None,
            port: 8080,
        }
    }
}

impl EnvironmentSpec {
    /// 명세의 유효성을 검증합니다.
    ///
    /// 필수 필드가 비어 있으면 즉시 실패하며, 어떤 리소스도 생성하기 전에 호출됩니다.
    pub fn validate(&self) -> Result<(), SpecError> {
        require(&self.name, "name", "environment name")?;
        require(&self.network.bridge, "network.bridge", "bridge name")?;
        require(&self.network.cidr, "network.cidr", "network address range")?;
        require(&self.network.dhcp_range, "network.dhcp_range", "DHCP range")?;
        require(&self.cluster.name, "cluster.name", "cluster name")?;
        require(&self.deploy.namespace, "deploy.namespace", "namespace")?;
        require(&self.deploy.service, "deploy.service", "service name")?;

        if self.network.bridge.len() > MAX_BRIDGE_NAME_LEN {
            return Err(SpecError::Invalid {
                field: "network.bridge".to_owned(),
                reason: format!(
                    "'{}' is longer than {MAX_BRIDGE_NAME_LEN} characters",
                    self.network.bridge
                ),
            });
        }

        let cidr = self.cidr()?;
        let (start, end) = self.dhcp_bounds()?;
        for addr in [start, end] {
            if !cidr.contains(addr) {
                return Err(SpecError::Invalid {
                    field: "network.dhcp_range".to_owned(),
                    reason: format!("{addr} is outside {cidr}"),
                });
            }
        }
        if u32::from(start) > u32::from(end) {
            return Err(SpecError::Invalid {
                field: "network.dhcp_range".to_owned(),
                reason: format!("start {start} is after end {end}"),
            });
        }

        if self.deploy.port == 0 {
            return Err(SpecError::Invalid {
                field: "deploy.port".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }

    /// 파싱된 네트워크 범위
    pub fn cidr(&self) -> Result<Ipv4Cidr, SpecError> {
        self.network
            .cidr
            .parse()
            .map_err(|reason| SpecError::Invalid {
                field: "network.cidr".to_owned(),
                reason,
            })
    }

    /// DHCP 범위의 시작/끝 주소
    ///
    /// dnsmasq 형식(`start,end[,lease]`)을 받아들입니다.
    pub fn dhcp_bounds(&self) -> Result<(Ipv4Addr, Ipv4Addr), SpecError> {
        let invalid = |reason: String| SpecError::Invalid {
            field: "network.dhcp_range".to_owned(),
            reason,
        };
        let mut parts = self.network.dhcp_range.split(',').map(str::trim);
        let start = parts.next().unwrap_or_default();
        let end = parts
            .next()
            .ok_or_else(|| invalid("expected 'start,end'".to_owned()))?;
        let start: Ipv4Addr = start
            .parse()
            .map_err(|_| invalid(format!("'{start}' is not an IPv4 address")))?;
        let end: Ipv4Addr = end
            .parse()
            .map_err(|_| invalid(format!("'{end}' is not an IPv4 address")))?;
        Ok((start, end))
    }
}

fn require(value: &str, field: &str, label: &str) -> Result<(), SpecError> {
    if value.trim().is_empty() {
        return Err(SpecError::MissingField {
            field: field.to_owned(),
            label: label.to_owned(),
        });
    }
    Ok(())
}

// ─── 환경 레코드 ────────────────────────────────────────────────────

/// 프로비저닝 진행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentState {
    /// 생성된 리소스 없음
    Empty,
    /// 브리지 + 가상 네트워크 준비
    NetworkReady,
    /// 부트 서비스 실행 중
    ServiceReady,
    /// 클러스터 준비
    ClusterReady,
    /// 배포 완료 (사용 가능)
    Deployed,
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::NetworkReady => "network-ready",
            Self::ServiceReady => "service-ready",
            Self::ClusterReady => "cluster-ready",
            Self::Deployed => "deployed",
        };
        f.write_str(name)
    }
}

/// 프로비저닝된 환경
///
/// 생성된 리소스마다 핸들을 하나씩 가집니다. 생성 도중 실패하면 일부 핸들만
/// 채워진 상태가 되며, 해제 로직은 채워진 핸들만 역순으로 정리합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// 고유 ID (UUID v4)
    pub id: String,
    /// 환경 이름
    pub name: String,
    /// 생성 시각
    pub created_at: SystemTime,
    /// 생성에 사용한 명세
    pub spec: EnvironmentSpec,
    /// 작업 디렉토리
    pub work_dir: Option<PathBuf>,
    /// TFTP 부트 루트
    pub boot_root: Option<PathBuf>,
    /// 브리지 이름
    pub bridge: Option<String>,
    /// 가상 네트워크 이름
    pub network: Option<String>,
    /// 부트 서비스 ID
    pub boot_service: Option<String>,
    /// 클러스터 이름
    pub cluster: Option<String>,
    /// 클러스터 접속 정보 경로
    pub kubeconfig: Option<PathBuf>,
    /// 배포 식별자 (`namespace/service`)
    pub deployment: Option<String>,
}

impl Environment {
    /// 리소스가 하나도 없는 새 환경 레코드를 만듭니다.
    pub fn new(spec: EnvironmentSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            created_at: SystemTime::now(),
            spec,
            work_dir: None,
            boot_root: None,
            bridge: None,
            network: None,
            boot_service: None,
            cluster: None,
            kubeconfig: None,
            deployment: None,
        }
    }

    /// 리소스 이름 접미어로 쓰는 축약 ID
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(SHORT_ID_LEN)
            .map_or(self.id.len(), |(i, _)| i);
        &self.id[..end]
    }

    /// 현재 프로비저닝 상태
    pub fn state(&self) -> EnvironmentState {
        let network = self.bridge.is_some() && self.network.is_some();
        let service = network && self.boot_service.is_some();
        let cluster = service && self.cluster.is_some() && self.kubeconfig.is_some();
        let deployed = cluster && self.deployment.is_some();

        if deployed {
            EnvironmentState::Deployed
        } else if cluster {
            EnvironmentState::ClusterReady
        } else if service {
            EnvironmentState::ServiceReady
        } else if network {
            EnvironmentState::NetworkReady
        } else {
            EnvironmentState::Empty
        }
    }

    /// 모든 리소스가 준비되었는지 확인합니다.
    pub fn is_complete(&self) -> bool {
        self.work_dir.is_some() && self.state() == EnvironmentState::Deployed
    }

    /// 아직 핸들이 남아 있는 리소스 목록 (생성 순서)
    pub fn held_resources(&self) -> Vec<ResourceKind> {
        let mut held = Vec::new();
        if self.work_dir.is_some() {
            held.push(ResourceKind::Workspace);
        }
        if self.bridge.is_some() {
            held.push(ResourceKind::Bridge);
        }
        if self.network.is_some() {
            held.push(ResourceKind::VirtualNetwork);
        }
        if self.boot_service.is_some() {
            held.push(ResourceKind::BootService);
        }
        if self.cluster.is_some() {
            held.push(ResourceKind::Cluster);
        }
        if self.deployment.is_some() {
            held.push(ResourceKind::Deployment);
        }
        held
    }
}

// ─── 부트 검증 ──────────────────────────────────────────────────────

/// 부트 검증 단계
///
/// 순서가 고정되어 있으며, [`BootAttempt`]의 단계 결과는 이 순서로만 추가됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// DHCP 임대 획득
    LeaseAcquired,
    /// 부트 파일 전송
    BootFileFetched,
    /// 부트된 시스템의 콜백 수신
    CallbackObserved,
    /// 프로필/설정 선택 검증
    SelectionVerified,
}

impl Phase {
    /// 정의 순서대로 나열한 전체 단계
    pub const ALL: [Phase; 4] = [
        Phase::LeaseAcquired,
        Phase::BootFileFetched,
        Phase::CallbackObserved,
        Phase::SelectionVerified,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LeaseAcquired => "lease-acquired",
            Self::BootFileFetched => "boot-file-fetched",
            Self::CallbackObserved => "callback-observed",
            Self::SelectionVerified => "selection-verified",
        };
        f.write_str(name)
    }
}

/// 단계 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// 단계
    pub phase: Phase,
    /// 충족 여부
    pub satisfied: bool,
    /// 기록 시각
    pub timestamp: SystemTime,
    /// 부가 설명
    pub message: Option<String>,
}

/// 부트 시도 결과
///
/// 성공/실패와 관계없이 항상 구성된 모든 단계의 결과를 담습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootAttempt {
    /// 대상 이름
    pub target: String,
    /// 관측된 대상 주소
    pub address: Option<IpAddr>,
    /// 단계 결과 (정의 순서)
    pub phases: Vec<PhaseResult>,
    /// 전체 성공 여부 (모든 필수 단계 충족)
    pub success: bool,
    /// 진단 로그 (콘솔 출력 등)
    pub logs: Vec<String>,
    /// 실행 중 발생한 에러 메시지
    pub errors: Vec<String>,
    /// 시작 시각
    pub started_at: SystemTime,
    /// 종료 시각
    pub finished_at: Option<SystemTime>,
}

impl BootAttempt {
    /// 새 부트 시도를 시작합니다.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            address: None,
            phases: Vec::new(),
            success: false,
            logs: Vec::new(),
            errors: Vec::new(),
            started_at: SystemTime::now(),
            finished_at: None,
        }
    }

    /// 단계 결과를 기록합니다.
    ///
    /// 이미 기록된 단계보다 앞서거나 같은 단계는 무시하고 에러로 남깁니다.
    pub fn record(&mut self, phase: Phase, satisfied: bool, message: Option<String>) {
        if let Some(last) = self.phases.last()
            && last.phase >= phase
        {
            self.errors
                .push(format!("phase {phase} recorded out of order after {}", last.phase));
            return;
        }
        self.phases.push(PhaseResult {
            phase,
            satisfied,
            timestamp: SystemTime::now(),
            message,
        });
    }

    /// 특정 단계의 결과
    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    /// 단계가 충족되었는지 확인합니다.
    pub fn is_satisfied(&self, phase: Phase) -> bool {
        self.phase(phase).is_some_and(|r| r.satisfied)
    }

    /// 충족되지 않은 단계 목록
    pub fn unsatisfied(&self) -> Vec<Phase> {
        self.phases
            .iter()
            .filter(|r| !r.satisfied)
            .map(|r| r.phase)
            .collect()
    }

    /// 시도를 종료하고 성공 여부를 계산합니다.
    ///
    /// 성공은 `required`의 모든 단계가 기록되고 충족되었을 때만 참입니다.
    pub fn finish(&mut self, required: &[Phase]) {
        self.success = !required.is_empty() && required.iter().all(|p| self.is_satisfied(*p));
        self.finished_at = Some(SystemTime::now());
    }
}

/// 부트 대상 식별 정보
///
/// 임대/콜백 레코드가 이 대상의 것인지 판단할 때 사용합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    /// 대상 이름 (VM 이름이자 DHCP 호스트명)
    pub name: String,
    /// MAC 주소
    pub mac: Option<String>,
}

impl TargetIdentity {
    /// 임대가 이 대상의 것인지 확인합니다.
    pub fn matches_lease(&self, lease: &Lease) -> bool {
        match &self.mac {
            Some(mac) => mac.eq_ignore_ascii_case(&lease.mac),
            None => lease.hostname.as_deref() == Some(self.name.as_str()),
        }
    }

    /// 콜백이 이 대상의 것인지 확인합니다.
    ///
    /// MAC 또는 임대로 관측한 주소 중 하나가 일치하면 같은 대상으로 봅니다.
    pub fn matches_callback(&self, record: &CallbackRecord, address: Option<IpAddr>) -> bool {
        let mac_match = match (&self.mac, &record.mac) {
            (Some(ours), Some(theirs)) => ours.eq_ignore_ascii_case(theirs),
            _ => false,
        };
        let addr_match = address.is_some() && record.address == address;
        let name_match = record.hostname.as_deref() == Some(self.name.as_str());
        mac_match || addr_match || name_match
    }
}

/// DHCP 임대 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// 클라이언트 MAC
    pub mac: String,
    /// 할당된 주소
    pub address: IpAddr,
    /// 클라이언트 호스트명
    pub hostname: Option<String>,
    /// 만료 시각 (UNIX 초)
    pub expires_at: Option<u64>,
}

/// 부트된 시스템이 보낸 콜백 레코드
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackRecord {
    /// 보고된 MAC
    pub mac: Option<String>,
    /// 보고된 주소
    pub address: Option<IpAddr>,
    /// 보고된 호스트명
    pub hostname: Option<String>,
    /// 선택된 부트 프로필
    pub profile: Option<String>,
    /// 선택된 설정 이름
    pub config: Option<String>,
}

/// 기대하는 프로필/설정 선택
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionExpectation {
    /// 기대 프로필
    pub profile: Option<String>,
    /// 기대 설정
    pub config: Option<String>,
}

impl SelectionExpectation {
    /// 검증할 항목이 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.profile.is_none() && self.config.is_none()
    }

    /// 콜백 레코드와 비교하여 불일치 항목을 설명합니다.
    pub fn mismatches(&self, record: &CallbackRecord) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(expected) = &self.profile
            && record.profile.as_ref() != Some(expected)
        {
            out.push(format!(
                "profile: expected '{expected}', got '{}'",
                record.profile.as_deref().unwrap_or("<none>")
            ));
        }
        if let Some(expected) = &self.config
            && record.config.as_ref() != Some(expected)
        {
            out.push(format!(
                "config: expected '{expected}', got '{}'",
                record.config.as_deref().unwrap_or("<none>")
            ));
        }
        out
    }
}

/// VM 생성 명세
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// 메모리 (MiB)
    pub memory_mib: u32,
    /// vCPU 수
    pub vcpus: u32,
    /// 연결할 가상 네트워크 이름
    pub network: String,
    /// 고정 MAC (없으면 하이퍼바이저가 할당)
    pub mac: Option<String>,
}

/// TLS 인증서 묶음 (PEM)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    /// CA 인증서
    pub ca_cert: String,
    /// CA 개인키
    pub ca_key: String,
    /// 서버 인증서
    pub server_cert: String,
    /// 서버 개인키
    pub server_key: String,
    /// 클라이언트 인증서
    pub client_cert: String,
    /// 클라이언트 개인키
    pub client_key: String,
}
