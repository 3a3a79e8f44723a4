//! pxelab-validate — 부트 검증 상태 머신
//!
//! 가상 클라이언트 하나를 PXE 부팅시키고 단계별로 부트 서비스의 동작을 판정합니다.
//!
//! # 단계
//! 1. `lease-acquired`: 부트 서비스의 임대 기록에 대상이 나타남
//! 2. `boot-file-fetched`: 임대 결과로 추론
//! 3. `callback-observed`: 서비스가 대상의 부트 요청을 받았다고 보고
//! 4. `selection-verified`: 기대 프로필/설정과 일치 (기대값이 있을 때만)
//!
//! # 모듈
//! - [`config`]: 실행 입력과 기본값
//! - [`poll`]: 마감 시각이 있는 폴링 루프
//! - [`source`]: 임대/콜백 신호 소스
//! - [`validator`]: 상태 머신

pub mod config;
pub mod error;
pub mod poll;
pub mod source;
pub mod validator;

pub use config::{RunConfig, RunSettings};
pub use error::{SignalError, ValidateError};
pub use source::{BootServiceLeases, CallbackSource, HttpCallbackSource, LeaseSource};
pub use validator::BootValidator;
