//! 부트 검증 상태 머신
//!
//! 부트 시도 하나를 고정된 단계 순서로 진행합니다.
//!
//! ```text
//! create VM ─► lease-acquired ─► boot-file-fetched ─► callback-observed ─► [selection-verified]
//!                (poll, lease     (inferred from        (poll, callback
//!                 timeout)         lease result)          timeout)
//!                                                                     └─► console log, destroy VM
//! ```
//!
//! 각 단계는 자기 타임아웃과 전체 부트 타임아웃 중 먼저 오는 시각을 마감으로
//! 씁니다. 콜백 목록은 VM 생성 전에 한 번 스냅숏을 떠 두고, 그 뒤에 새로 나타난
//! 레코드만 이번 시도의 증거로 인정합니다. 앞 단계가 실패해도 이후 단계를 모두 기록하므로 실패한 시도도 단계별
//! 진단 정보를 온전히 담습니다.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use pxelab_core::driver::VmDriver;
use pxelab_core::metrics as m;
use pxelab_core::types::{BootAttempt, CallbackRecord, Lease, Phase, TargetIdentity};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{RunConfig, RunSettings};
use crate::error::{SignalError, ValidateError};
use crate::poll::{PollOutcome, poll_until};
use crate::source::{CallbackSource, LeaseSource};

/// 부트 검증기
pub struct BootValidator<V, L, C> {
    vm: Arc<V>,
    leases: L,
    callbacks: C,
}

impl<V, L, C> BootValidator<V, L, C>
where
    V: VmDriver,
    L: LeaseSource,
    C: CallbackSource,
{
    pub fn new(vm: Arc<V>, leases: L, callbacks: C) -> Self {
        Self {
            vm,
            leases,
            callbacks,
        }
    }

    /// 부트 시도 하나를 실행합니다.
    ///
    /// 설정된 단계가 모두 충족되면 `Ok(attempt)`, 하나라도 충족되지 않으면
    /// 같은 시도 기록을 담은 [`ValidateError::Failed`]를 반환합니다. 대상 VM은
    /// 결과와 관계없이 제거됩니다.
    pub async fn run(&self, config: &RunConfig) -> Result<BootAttempt, ValidateError> {
        let settings = config.normalized()?;
        let required = settings.phases();
        let started = Instant::now();
        let boot_deadline = started + settings.boot_timeout;
        let target = settings.target.clone();

        let mut attempt = BootAttempt::new(&target);
        info!(
            target = %target,
            network = %settings.vm.network,
            phases = required.len(),
            "starting boot attempt"
        );

        let earlier_callbacks = self.callback_snapshot(&target).await;

        match self.vm.create(&target, &settings.vm).await {
            Ok(()) => {
                self.run_phases(&settings, boot_deadline, &earlier_callbacks, &mut attempt)
                    .await
            }
            Err(e) => {
                warn!(target = %target, error = %e, "failed to create virtual client");
                attempt.errors.push(format!("virtual client creation failed: {e}"));
                for phase in &required {
                    attempt.record(
                        *phase,
                        false,
                        Some("not attempted: virtual client was not created".to_owned()),
                    );
                }
            }
        }

        self.cleanup(&target, &mut attempt).await;
        attempt.finish(&required);
        record_metrics(&attempt, started.elapsed());

        if attempt.success {
            info!(
                target = %target,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "boot attempt succeeded"
            );
            Ok(attempt)
        } else {
            warn!(
                target = %target,
                unsatisfied = ?attempt.unsatisfied(),
                errors = attempt.errors.len(),
                "boot attempt failed"
            );
            Err(ValidateError::Failed(Box::new(attempt)))
        }
    }

    async fn run_phases(
        &self,
        settings: &RunSettings,
        boot_deadline: Instant,
        earlier_callbacks: &[CallbackRecord],
        attempt: &mut BootAttempt,
    ) {
        let target = &settings.target;
        let mac = match settings.vm.mac.clone() {
            Some(mac) => Some(mac),
            None => match self.vm.mac_address(target).await {
                Ok(mac) => mac,
                Err(e) => {
                    attempt.errors.push(format!("failed to read MAC address: {e}"));
                    None
                }
            },
        };
        let identity = TargetIdentity {
            name: target.clone(),
            mac,
        };
        debug!(target = %target, mac = ?identity.mac, "target identity resolved");

        // 1. 임대 획득
        let deadline = phase_deadline(settings.lease_timeout, boot_deadline);
        let lease = self.await_lease(&identity, deadline, settings.poll_interval).await;
        let lease = match lease {
            PollOutcome::Observed(lease) => {
                attempt.address = Some(lease.address);
                attempt.record(
                    Phase::LeaseAcquired,
                    true,
                    Some(format!("lease {} for {}", lease.address, lease.mac)),
                );
                Some(lease)
            }
            PollOutcome::Expired { polls, last_error } => {
                let message = expired_message("no lease", settings.lease_timeout, polls, last_error);
                attempt.record(Phase::LeaseAcquired, false, Some(message));
                attempt.address = self.hypervisor_address(target).await;
                None
            }
        };

        // 2. 부트 파일 전송: 직접 관측할 신호가 없어 임대 결과로 추론
        attempt.record(
            Phase::BootFileFetched,
            lease.is_some(),
            Some("inferred from lease acquisition".to_owned()),
        );

        // 3. 콜백 관측
        let deadline = phase_deadline(settings.callback_timeout, boot_deadline);
        let callback = self
            .await_callback(
                &identity,
                attempt.address,
                earlier_callbacks,
                deadline,
                settings.poll_interval,
            )
            .await;
        let callback = match callback {
            PollOutcome::Observed(record) => {
                attempt.record(
                    Phase::CallbackObserved,
                    true,
                    Some(describe_callback(&record)),
                );
                Some(record)
            }
            PollOutcome::Expired { polls, last_error } => {
                let message =
                    expired_message("no callback", settings.callback_timeout, polls, last_error);
                attempt.record(Phase::CallbackObserved, false, Some(message));
                None
            }
        };

        // 4. 선택 검증 (기대값이 있을 때만)
        if let Some(expect) = &settings.expect {
            match &callback {
                Some(record) => {
                    let mismatches = expect.mismatches(record);
                    let message = if mismatches.is_empty() {
                        "selection matches expectation".to_owned()
                    } else {
                        mismatches.join("; ")
                    };
                    attempt.record(Phase::SelectionVerified, mismatches.is_empty(), Some(message));
                }
                None => attempt.record(
                    Phase::SelectionVerified,
                    false,
                    Some("no callback to verify".to_owned()),
                ),
            }
        }
    }

    async fn await_lease(
        &self,
        identity: &TargetIdentity,
        deadline: Instant,
        interval: Duration,
    ) -> PollOutcome<Lease> {
        let leases = &self.leases;
        poll_until(deadline, interval, move || async move {
            let lease = leases.lease_for(identity).await?;
            Ok::<_, SignalError>(lease.filter(|l| identity.matches_lease(l)))
        })
        .await
    }

    /// 임대가 없을 때 하이퍼바이저가 아는 주소. 콜백 매칭과 보고에만 쓰입니다.
    async fn hypervisor_address(&self, target: &str) -> Option<IpAddr> {
        match self.vm.address(target).await {
            Ok(address) => {
                debug!(target = %target, address = ?address, "address from hypervisor");
                address
            }
            Err(e) => {
                debug!(target = %target, error = %e, "hypervisor address unavailable");
                None
            }
        }
    }

    /// 시도 시작 전에 서비스가 이미 가진 콜백 레코드
    ///
    /// 조회에 실패하면 빈 목록을 돌려주므로 이후 모든 레코드가 새 것으로 취급됩니다.
    async fn callback_snapshot(&self, target: &str) -> Vec<CallbackRecord> {
        match self.callbacks.callbacks().await {
            Ok(records) => {
                debug!(target = %target, earlier = records.len(), "callback snapshot taken");
                records
            }
            Err(e) => {
                warn!(
                    target = %target,
                    error = %e,
                    "cannot snapshot earlier callbacks, every record will count as new"
                );
                Vec::new()
            }
        }
    }

    async fn await_callback(
        &self,
        identity: &TargetIdentity,
        address: Option<IpAddr>,
        earlier: &[CallbackRecord],
        deadline: Instant,
        interval: Duration,
    ) -> PollOutcome<CallbackRecord> {
        let callbacks = &self.callbacks;
        poll_until(deadline, interval, move || async move {
            let records = callbacks.callbacks().await?;
            Ok::<_, SignalError>(
                new_records(records, earlier)
                    .into_iter()
                    .rev()
                    .find(|r| identity.matches_callback(r, address)),
            )
        })
        .await
    }

    /// 콘솔 로그를 수집하고 VM을 제거합니다. 실패는 시도 기록의 에러로 남깁니다.
    async fn cleanup(&self, target: &str, attempt: &mut BootAttempt) {
        match self.vm.console_log(target).await {
            Ok(log) => attempt
                .logs
                .extend(log.lines().filter(|l| !l.trim().is_empty()).map(str::to_owned)),
            Err(e) if e.is_not_found() => {}
            Err(e) => attempt.errors.push(format!("console log unavailable: {e}")),
        }

        match self.vm.destroy(target).await {
            Ok(()) => debug!(target = %target, "virtual client destroyed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(target = %target, error = %e, "failed to destroy virtual client");
                attempt.errors.push(format!("failed to destroy virtual client: {e}"));
            }
        }
    }
}

/// `earlier`에 있던 레코드를 개수만큼 제외한 나머지
///
/// 같은 내용의 레코드가 여러 번 올 수 있으므로 집합이 아니라 다중집합으로 뺍니다.
fn new_records(records: Vec<CallbackRecord>, earlier: &[CallbackRecord]) -> Vec<CallbackRecord> {
    let mut unmatched: Vec<&CallbackRecord> = earlier.iter().collect();
    records
        .into_iter()
        .filter(|record| match unmatched.iter().position(|e| *e == record) {
            Some(i) => {
                unmatched.swap_remove(i);
                false
            }
            None => true,
        })
        .collect()
}

fn phase_deadline(timeout: Duration, boot_deadline: Instant) -> Instant {
    (Instant::now() + timeout).min(boot_deadline)
}

fn expired_message(
    what: &str,
    timeout: Duration,
    polls: u32,
    last_error: Option<String>,
) -> String {
    let mut message = format!("{what} within {}s ({polls} polls)", timeout.as_secs());
    if let Some(e) = last_error {
        message.push_str(&format!("; last error: {e}"));
    }
    message
}

fn describe_callback(record: &CallbackRecord) -> String {
    let mut parts = vec!["callback received".to_owned()];
    if let Some(profile) = &record.profile {
        parts.push(format!("profile={profile}"));
    }
    if let Some(config) = &record.config {
        parts.push(format!("config={config}"));
    }
    parts.join(" ")
}

fn record_metrics(attempt: &BootAttempt, elapsed: Duration) {
    let outcome = if attempt.success { "success" } else { "failure" };
    counter!(m::BOOT_ATTEMPTS_TOTAL, m::LABEL_OUTCOME => outcome).increment(1);
    histogram!(m::BOOT_DURATION_SECONDS).record(elapsed.as_secs_f64());
    for phase in attempt.unsatisfied() {
        counter!(m::BOOT_PHASE_FAILURES_TOTAL, m::LABEL_PHASE => phase.to_string()).increment(1);
    }
}
