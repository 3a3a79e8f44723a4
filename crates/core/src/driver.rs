//! 드라이버 trait — 호스트/클러스터 리소스 조작 추상화
//!
//! 라이프사이클 관리자와 부트 검증기는 이 trait에만 의존합니다.
//! 실제 구현은 `pxelab-drivers` 크레이트에 있으며(`ip`, `virsh`, `dnsmasq`,
//! `kind`, `kubectl`), 테스트에서는 메모리 구현을 주입합니다.
//!
//! # 멱등성 규약
//! 모든 `delete`/`destroy` 메서드는 리소스가 이미 없으면 `Ok(())`를 반환해야 합니다.
//! 해제 로직은 이 규약에 기대어 두 번 호출해도 안전하게 동작합니다.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::error::DriverError;
use crate::types::{CertificateBundle, ClusterSpec, DeploySpec, Lease, TargetIdentity, VmSpec};

/// 브리지 생성 명세
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSpec {
    /// 인터페이스 이름
    pub name: String,
    /// 브리지에 할당할 주소
    pub address: Ipv4Addr,
    /// 프리픽스 길이
    pub prefix: u8,
}

/// 가상 네트워크 생성 명세
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNetworkSpec {
    /// 네트워크 이름
    pub name: String,
    /// 연결할 브리지
    pub bridge: String,
}

/// 부트 서비스(DHCP + TFTP) 생성 명세
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootServiceSpec {
    /// 서비스가 바인드할 인터페이스 (브리지)
    pub interface: String,
    /// DHCP 범위 (`start,end[,lease]`)
    pub dhcp_range: String,
    /// 라우터 옵션으로 광고할 게이트웨이
    pub gateway: Ipv4Addr,
    /// TFTP 루트
    pub boot_root: PathBuf,
    /// iPXE 체인로드 URL
    pub boot_url: Option<String>,
    /// TFTP 부트 파일
    pub boot_file: Option<String>,
}

/// 브리지와 가상 네트워크 드라이버
pub trait NetworkDriver: Send + Sync + 'static {
    /// 브리지를 생성하고 주소를 할당한 뒤 활성화합니다.
    fn create_bridge(
        &self,
        spec: &BridgeSpec,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 브리지를 삭제합니다. 없으면 성공입니다.
    fn delete_bridge(&self, name: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 브리지 존재 여부
    fn bridge_exists(&self, name: &str) -> impl Future<Output = Result<bool, DriverError>> + Send;

    /// 브리지에 연결된 가상 네트워크를 정의하고 시작합니다.
    fn create_network(
        &self,
        spec: &VirtualNetworkSpec,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 가상 네트워크를 중지하고 정의를 제거합니다. 없으면 성공입니다.
    fn delete_network(&self, name: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 가상 네트워크 존재 여부
    fn network_exists(&self, name: &str)
    -> impl Future<Output = Result<bool, DriverError>> + Send;
}

/// DHCP/TFTP 부트 서비스 드라이버
pub trait BootServiceDriver: Send + Sync + 'static {
    /// 서비스를 시작합니다. `id`로 이후 조회/삭제합니다.
    fn create(
        &self,
        id: &str,
        spec: &BootServiceSpec,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 서비스를 중지하고 런타임 파일을 정리합니다. 없으면 성공입니다.
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 서비스 실행 여부
    fn exists(&self, id: &str) -> impl Future<Output = Result<bool, DriverError>> + Send;

    /// 대상에 할당된 현재 임대를 조회합니다.
    fn lease_for(
        &self,
        id: &str,
        target: &TargetIdentity,
    ) -> impl Future<Output = Result<Option<Lease>, DriverError>> + Send;
}

/// 로컬 쿠버네티스 클러스터 드라이버
pub trait ClusterDriver: Send + Sync + 'static {
    /// 클러스터를 생성하고 접속 정보를 `kubeconfig` 경로에 기록합니다.
    fn create(
        &self,
        spec: &ClusterSpec,
        kubeconfig: &Path,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 클러스터를 삭제합니다. 없으면 성공입니다.
    fn delete(&self, name: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// 클러스터 존재 여부
    fn exists(&self, name: &str) -> impl Future<Output = Result<bool, DriverError>> + Send;
}

/// 클러스터 배포 드라이버
pub trait DeployDriver: Send + Sync + 'static {
    /// 서비스를 배포하고 준비될 때까지 기다립니다.
    fn deploy(
        &self,
        cluster: &str,
        kubeconfig: &Path,
        spec: &DeploySpec,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// 부트 대상 VM 드라이버
pub trait VmDriver: Send + Sync + 'static {
    /// 네트워크 부트로 시작하는 VM을 생성합니다.
    fn create(
        &self,
        name: &str,
        spec: &VmSpec,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// VM을 강제 종료하고 정의를 제거합니다. 없으면 성공입니다.
    fn destroy(&self, name: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// VM 존재 여부
    fn exists(&self, name: &str) -> impl Future<Output = Result<bool, DriverError>> + Send;

    /// VM의 첫 번째 NIC MAC 주소
    fn mac_address(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, DriverError>> + Send;

    /// 하이퍼바이저가 알고 있는 VM 주소
    fn address(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<IpAddr>, DriverError>> + Send;

    /// 직렬 콘솔 로그
    fn console_log(&self, name: &str)
    -> impl Future<Output = Result<String, DriverError>> + Send;
}

/// TLS 인증서 발급기
pub trait CertificateIssuer: Send + Sync {
    /// CA와 서버/클라이언트 인증서를 발급합니다.
    fn issue(&self, server_names: &[String]) -> Result<CertificateBundle, DriverError>;
}
