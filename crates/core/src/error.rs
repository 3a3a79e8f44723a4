//! 에러 타입 — 도메인별 에러 정의
//!
//! 각 크레이트는 자기 에러 타입을 가지고, `From` 구현으로 [`PxelabError`]로 변환됩니다.
//! 드라이버 에러([`DriverError`])와 환경 명세 에러([`SpecError`])는 여러 크레이트가
//! 공유하므로 여기에 둡니다.

use crate::types::ResourceKind;

/// pxelab 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum PxelabError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 환경 명세 에러
    #[error("spec error: {0}")]
    Spec(#[from] SpecError),

    /// 호스트 드라이버 에러
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// 환경 생성/해제 에러
    #[error("environment error: {0}")]
    Environment(String),

    /// 터널 에러
    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// 부트 검증 에러
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 환경 명세 검증 에러
///
/// 사람이 읽는 이름(`label`)을 먼저 출력하므로 "DHCP range" 처럼
/// 누락된 항목을 바로 알 수 있습니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    /// 필수 필드 누락
    #[error("{label} ({field}) must not be empty")]
    MissingField { field: String, label: String },

    /// 필드 값이 형식에 맞지 않음
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl SpecError {
    /// 문제가 된 필드 경로 (`network.dhcp_range` 등)
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field, .. } | Self::Invalid { field, .. } => field,
        }
    }
}

/// 호스트 드라이버 에러
///
/// `ip`, `virsh`, `kind`, `kubectl` 같은 외부 도구 호출 실패를 표현합니다.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// 리소스가 존재하지 않음
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    /// 리소스가 이미 존재함
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// 명령이 0이 아닌 상태로 종료
    #[error("command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// 명령 실행 자체가 불가능
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// 명령 시간 초과
    #[error("command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// 그 밖의 드라이버 실패
    #[error("{kind} '{name}': {reason}")]
    Failed {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// 리소스 부재로 인한 에러인지 확인합니다.
    ///
    /// 해제 경로에서는 이미 없는 리소스를 성공으로 취급합니다.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
