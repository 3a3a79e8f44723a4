//! 마감 시각이 있는 폴링 루프
//!
//! 고정 간격 틱마다 신호를 한 번 조회하고, 마감 시각이 지난 뒤에 도착한 틱은
//! 조회하지 않고 만료로 처리합니다. 조회 자체도 마감 시각과 경합하므로 느린
//! 조회가 마감을 넘기지 못합니다.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::SignalError;

/// 폴링 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// 신호 관측
    Observed(T),
    /// 마감 시각까지 관측하지 못함
    Expired {
        /// 실제로 수행한 조회 횟수
        polls: u32,
        /// 마지막 조회 에러
        last_error: Option<String>,
    },
}

/// `deadline`까지 `interval`마다 `check`를 호출해 값이 나오면 반환합니다.
pub async fn poll_until<T, F, Fut>(
    deadline: Instant,
    interval: Duration,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, SignalError>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls = 0u32;
    let mut last_error = None;

    loop {
        if tokio::time::timeout_at(deadline, ticker.tick()).await.is_err()
            || Instant::now() >= deadline
        {
            return PollOutcome::Expired { polls, last_error };
        }

        polls += 1;
        match tokio::time::timeout_at(deadline, check()).await {
            Err(_) => return PollOutcome::Expired { polls, last_error },
            Ok(Ok(Some(value))) => return PollOutcome::Observed(value),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                debug!(poll = polls, error = %e, "signal poll failed");
                last_error = Some(e.to_string());
            }
        }
    }
}
