//! 부트 검증 에러 타입

use pxelab_core::error::{DriverError, PxelabError};
use pxelab_core::types::BootAttempt;

/// 부트 검증 에러
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    /// 실행 설정 오류 (VM을 만들기 전에 실패)
    #[error("invalid run config: {0}")]
    InvalidConfig(String),

    /// 설정된 단계 중 하나 이상이 충족되지 않음
    ///
    /// 단계별 결과가 담긴 시도 기록을 함께 돌려줍니다.
    #[error("{}", describe_failure(.0))]
    Failed(Box<BootAttempt>),
}

fn describe_failure(attempt: &BootAttempt) -> String {
    let phases = attempt.unsatisfied();
    let phases = if phases.is_empty() {
        "none".to_owned()
    } else {
        phases
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "boot validation failed for '{}': unsatisfied phases: {phases}",
        attempt.target
    )
}

impl ValidateError {
    /// 실패한 시도 기록
    pub fn attempt(&self) -> Option<&BootAttempt> {
        match self {
            Self::Failed(attempt) => Some(attempt),
            Self::InvalidConfig(_) => None,
        }
    }

    /// 실패한 시도 기록을 꺼냅니다.
    pub fn into_attempt(self) -> Option<BootAttempt> {
        match self {
            Self::Failed(attempt) => Some(*attempt),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<ValidateError> for PxelabError {
    fn from(err: ValidateError) -> Self {
        PxelabError::Validation(err.to_string())
    }
}

/// 임대/콜백 신호 조회 에러
///
/// 폴링 중 발생하면 다음 틱에 재시도하며, 마지막 에러만 진단 메시지로 남습니다.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// 드라이버 조회 실패
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// HTTP 요청 실패
    #[error("http request failed: {0}")]
    Http(String),

    /// 응답 본문 해석 실패
    #[error("unexpected response body: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use pxelab_core::types::Phase;

    use super::*;

    #[test]
    fn failed_lists_unsatisfied_phases() {
        let mut attempt = BootAttempt::new("vm-1");
        attempt.record(Phase::LeaseAcquired, false, None);
        attempt.record(Phase::BootFileFetched, false, None);
        attempt.record(Phase::CallbackObserved, true, None);
        let err = ValidateError::Failed(Box::new(attempt));

        let msg = err.to_string();
        assert!(msg.contains("'vm-1'"));
        assert!(msg.contains("lease-acquired, boot-file-fetched"), "got: {msg}");
        assert_eq!(err.attempt().map(|a| a.phases.len()), Some(3));
    }

    #[test]
    fn invalid_config_has_no_attempt() {
        let err = ValidateError::InvalidConfig("target must not be empty".to_owned());
        assert!(err.attempt().is_none());
        let top: PxelabError = err.into();
        assert!(matches!(top, PxelabError::Validation(_)));
    }
}
