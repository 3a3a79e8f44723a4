//! pxelab 공통 크레이트
//!
//! 모든 pxelab 크레이트가 공유하는 도메인 타입, 드라이버 trait, 에러, 설정, 메트릭 이름을 정의합니다.

pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, DriverError, PxelabError, SpecError};

// 설정
pub use config::PxelabConfig;

// 드라이버 trait
pub use driver::{
    BootServiceDriver, BootServiceSpec, BridgeSpec, CertificateIssuer, ClusterDriver,
    DeployDriver, NetworkDriver, VirtualNetworkSpec, VmDriver,
};

// 도메인 타입
pub use types::{
    BootAttempt, CallbackRecord, CertificateBundle, ClusterSpec, DeploySpec, Environment,
    EnvironmentSpec, EnvironmentState, Ipv4Cidr, Lease, NetworkSpec, Phase, PhaseResult,
    ResourceKind, SelectionExpectation, TargetIdentity, VmSpec,
};
