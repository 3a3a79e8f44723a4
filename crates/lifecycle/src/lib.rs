//! pxelab-lifecycle — 부트 테스트 환경 생성/해제
//!
//! 드라이버 트레이트 위에서 환경 하나의 전체 수명 주기를 관리합니다.
//!
//! - [`EnvironmentManager`]: 단계별 생성, 실패 시 역순 롤백, 멱등 해제
//! - [`EnvironmentStore`]: 생성된 환경 레코드를 디스크에 보관
//!
//! # 사용 예시
//!
//! ```ignore
//! let manager = EnvironmentManager::builder()
//!     .network(Arc::new(drivers.network))
//!     .boot_service(Arc::new(drivers.boot))
//!     .cluster(Arc::new(drivers.cluster))
//!     .deployer(Arc::new(drivers.deploy))
//!     .work_root(&config.general.work_root)
//!     .build()?;
//!
//! let env = manager.provision(&spec).await?;
//! // ... 부트 검증 ...
//! manager.teardown(Some(&env)).await?;
//! ```

pub mod error;
pub mod manager;
pub mod store;

pub use error::{ProvisionError, ProvisionStep, StoreError, TeardownError, TeardownFailure};
pub use manager::{EnvironmentManager, EnvironmentManagerBuilder};
pub use store::EnvironmentStore;
