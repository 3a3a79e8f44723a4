//! 부트 검증 상태 머신 통합 테스트
//!
//! 인메모리 랩(VM + 부트 서비스 임대)과 가짜 콜백 소스를 가상 시간 위에서 돌립니다.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pxelab_core::types::{BootAttempt, CallbackRecord, Phase, SelectionExpectation, VmSpec};
use pxelab_drivers::memory::{LabOp, MemoryLab};
use pxelab_validate::{
    BootServiceLeases, BootValidator, CallbackSource, RunConfig, SignalError, ValidateError,
};

const TARGET: &str = "vm-1";

#[derive(Clone, Default)]
struct FakeCallbacks {
    records: Arc<Mutex<Vec<CallbackRecord>>>,
    empty_polls: Arc<AtomicU32>,
    polls: Arc<AtomicU32>,
}

impl FakeCallbacks {
    /// The service receives `record` after the attempt has started: the
    /// pre-boot snapshot sees an empty list.
    fn with(record: CallbackRecord) -> Self {
        let callbacks = Self::default();
        callbacks.records.lock().unwrap().push(record);
        callbacks.after_polls(1)
    }

    fn after_polls(self, n: u32) -> Self {
        self.empty_polls.store(n, Ordering::SeqCst);
        self
    }
}

impl CallbackSource for FakeCallbacks {
    async fn callbacks(&self) -> Result<Vec<CallbackRecord>, SignalError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if poll < self.empty_polls.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

type LabValidator = BootValidator<MemoryLab, BootServiceLeases<MemoryLab>, FakeCallbacks>;

fn validator(lab: &MemoryLab, callbacks: FakeCallbacks) -> LabValidator {
    let lab = Arc::new(lab.clone());
    let leases = BootServiceLeases::new(Arc::clone(&lab), "env-1");
    BootValidator::new(lab, leases, callbacks)
}

fn run_config() -> RunConfig {
    RunConfig {
        target: TARGET.to_owned(),
        vm: VmSpec {
            memory_mib: 0,
            vcpus: 0,
            network: "pxelab-abc".to_owned(),
            mac: None,
        },
        ..RunConfig::default()
    }
}

fn addr() -> IpAddr {
    "10.42.0.150".parse().unwrap()
}

fn callback(profile: &str) -> CallbackRecord {
    CallbackRecord {
        hostname: Some(TARGET.to_owned()),
        profile: Some(profile.to_owned()),
        ..CallbackRecord::default()
    }
}

fn failed_attempt(result: Result<BootAttempt, ValidateError>) -> BootAttempt {
    match result {
        Err(ValidateError::Failed(attempt)) => *attempt,
        Err(other) => panic!("unexpected error: {other}"),
        Ok(attempt) => panic!("expected failure, got success: {attempt:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn successful_boot_satisfies_every_phase() {
    // Given: DHCP가 두 번째 폴링 뒤 임대를 주고 서비스가 콜백을 받음
    let lab = MemoryLab::new()
        .with_dhcp(addr(), 2)
        .with_console_log("iPXE initialising devices...\n\nhttp://10.42.0.1:8080/boot.ipxe... ok\n");
    let validator = validator(&lab, FakeCallbacks::with(callback("rocky9")).after_polls(3));

    // When
    let attempt = validator.run(&run_config()).await.unwrap();

    // Then
    assert!(attempt.success);
    assert_eq!(attempt.phases.len(), 3);
    assert!(attempt.phases.iter().all(|p| p.satisfied));
    assert_eq!(attempt.address, Some(addr()));
    assert_eq!(
        attempt.phase(Phase::BootFileFetched).unwrap().message.as_deref(),
        Some("inferred from lease acquisition")
    );
    assert_eq!(attempt.logs.len(), 2, "blank console lines are dropped");
    assert!(attempt.logs[0].contains("iPXE"));
    assert!(attempt.errors.is_empty());
    assert!(attempt.finished_at.is_some());
    assert!(lab.vms().is_empty(), "virtual client must be destroyed");
}

#[tokio::test(start_paused = true)]
async fn missing_lease_still_checks_callback_phase() {
    // Given: 임대도 콜백도 나타나지 않음
    let lab = MemoryLab::new();
    let callbacks = FakeCallbacks::default();
    let validator = validator(&lab, callbacks.clone());
    let started = tokio::time::Instant::now();

    // When
    let attempt = failed_attempt(validator.run(&run_config()).await);

    // Then: 세 단계 모두 기록되고 각각 진단 메시지를 가짐
    assert!(!attempt.success);
    assert_eq!(attempt.phases.len(), 3);
    let lease = attempt.phase(Phase::LeaseAcquired).unwrap();
    assert!(!lease.satisfied);
    assert!(lease.message.as_deref().unwrap().contains("no lease within 30s"));
    assert!(!attempt.is_satisfied(Phase::BootFileFetched));
    let cb = attempt.phase(Phase::CallbackObserved).unwrap();
    assert!(!cb.satisfied);
    assert!(cb.message.as_deref().unwrap().contains("no callback within 120s"));
    assert!(callbacks.polls.load(Ordering::SeqCst) > 0, "callback phase must be attempted");

    // 각 단계가 자기 타임아웃만큼 기다림
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(150), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(160), "elapsed {elapsed:?}");
    assert!(lab.vms().is_empty());
}

#[tokio::test(start_paused = true)]
async fn later_phase_can_succeed_after_earlier_failure() {
    // Given: 임대는 없지만 서비스는 호스트명으로 콜백을 받음
    let lab = MemoryLab::new();
    let validator = validator(&lab, FakeCallbacks::with(callback("rocky9")));

    // When
    let attempt = failed_attempt(validator.run(&run_config()).await);

    // Then: 집계는 실패지만 3단계는 충족으로 기록됨
    assert!(!attempt.is_satisfied(Phase::LeaseAcquired));
    assert!(attempt.is_satisfied(Phase::CallbackObserved));
    assert!(!attempt.success);
}

#[tokio::test(start_paused = true)]
async fn callback_from_previous_attempt_is_not_counted() {
    // Given: an earlier attempt against the same service left its callback behind
    let callbacks = FakeCallbacks::with(callback("rocky9"));
    let first = validator(&MemoryLab::new().with_dhcp(addr(), 0), callbacks.clone());
    assert!(first.run(&run_config()).await.unwrap().success);

    // When: the next virtual client never boots
    let second = validator(&MemoryLab::new(), callbacks.clone());
    let attempt = failed_attempt(second.run(&run_config()).await);

    // Then: the old record is not evidence for this attempt
    let cb = attempt.phase(Phase::CallbackObserved).unwrap();
    assert!(!cb.satisfied, "stale callback counted: {cb:?}");
    assert!(cb.message.as_deref().unwrap().contains("no callback"));
    assert!(attempt.unsatisfied().contains(&Phase::CallbackObserved));
}

#[tokio::test(start_paused = true)]
async fn stale_callback_does_not_satisfy_selection() {
    // Given: the service already holds a callback for this target
    let callbacks = FakeCallbacks::default();
    callbacks.records.lock().unwrap().push(callback("rocky9"));
    let lab = MemoryLab::new().with_dhcp(addr(), 0);
    let validator = validator(&lab, callbacks);
    let mut config = run_config();
    config.expect = Some(SelectionExpectation {
        profile: Some("rocky9".to_owned()),
        config: None,
    });

    // When
    let attempt = failed_attempt(validator.run(&config).await);

    // Then
    assert_eq!(
        attempt.unsatisfied(),
        vec![Phase::CallbackObserved, Phase::SelectionVerified]
    );
    assert_eq!(
        attempt
            .phase(Phase::SelectionVerified)
            .and_then(|p| p.message.as_deref()),
        Some("no callback to verify")
    );
}

#[tokio::test(start_paused = true)]
async fn hypervisor_address_matches_callback_without_lease() {
    // Given: no DHCP lease is seen, but the hypervisor knows the client's address
    // and the callback carries only that address
    let lab = MemoryLab::new().with_vm_address(addr());
    let record = CallbackRecord {
        address: Some(addr()),
        profile: Some("rocky9".to_owned()),
        ..CallbackRecord::default()
    };
    let validator = validator(&lab, FakeCallbacks::with(record));

    // When
    let attempt = failed_attempt(validator.run(&run_config()).await);

    // Then
    assert_eq!(attempt.address, Some(addr()));
    assert!(!attempt.is_satisfied(Phase::LeaseAcquired));
    assert!(attempt.is_satisfied(Phase::CallbackObserved));
}

#[tokio::test(start_paused = true)]
async fn selection_mismatch_fails_fourth_phase() {
    // Given
    let lab = MemoryLab::new().with_dhcp(addr(), 0);
    let validator = validator(&lab, FakeCallbacks::with(callback("ubuntu24")));
    let mut config = run_config();
    config.expect = Some(SelectionExpectation {
        profile: Some("rocky9".to_owned()),
        config: None,
    });

    // When
    let attempt = failed_attempt(validator.run(&config).await);

    // Then
    assert_eq!(attempt.phases.len(), 4);
    assert_eq!(attempt.unsatisfied(), vec![Phase::SelectionVerified]);
    let message = attempt
        .phase(Phase::SelectionVerified)
        .and_then(|p| p.message.clone())
        .unwrap();
    assert!(message.contains("expected 'rocky9'"), "got: {message}");
    assert!(message.contains("ubuntu24"));
}

#[tokio::test(start_paused = true)]
async fn matching_selection_succeeds() {
    let lab = MemoryLab::new().with_dhcp(addr(), 0);
    let validator = validator(&lab, FakeCallbacks::with(callback("rocky9")));
    let mut config = run_config();
    config.expect = Some(SelectionExpectation {
        profile: Some("rocky9".to_owned()),
        config: None,
    });

    let attempt = validator.run(&config).await.unwrap();

    assert_eq!(attempt.phases.len(), 4);
    assert!(attempt.success);
}

#[tokio::test(start_paused = true)]
async fn vm_creation_failure_records_every_phase_unsatisfied() {
    // Given
    let lab = MemoryLab::new().fail(LabOp::CreateVm);
    let callbacks = FakeCallbacks::default();
    let validator = validator(&lab, callbacks.clone());

    // When
    let attempt = failed_attempt(validator.run(&run_config()).await);

    // Then
    assert_eq!(attempt.phases.len(), 3);
    assert!(attempt.phases.iter().all(|p| !p.satisfied));
    assert!(attempt.errors[0].contains("virtual client creation failed"));
    assert_eq!(
        callbacks.polls.load(Ordering::SeqCst),
        1,
        "only the pre-boot snapshot is taken"
    );
    assert_eq!(lab.count(LabOp::DestroyVm), 1, "cleanup still runs");
}

#[tokio::test(start_paused = true)]
async fn destroy_failure_is_reported_without_hiding_result() {
    // Given: 모든 단계가 성공하지만 VM 제거가 실패
    let lab = MemoryLab::new()
        .with_dhcp(addr(), 0)
        .fail(LabOp::DestroyVm);
    let validator = validator(&lab, FakeCallbacks::with(callback("rocky9")));

    // When
    let attempt = validator.run(&run_config()).await.unwrap();

    // Then
    assert!(attempt.success);
    assert!(
        attempt
            .errors
            .iter()
            .any(|e| e.contains("failed to destroy virtual client"))
    );
}

#[tokio::test(start_paused = true)]
async fn boot_timeout_bounds_the_whole_run() {
    // Given: 전체 부트 타임아웃이 단계 타임아웃 합보다 짧음
    let lab = MemoryLab::new();
    let validator = validator(&lab, FakeCallbacks::default());
    let mut config = run_config();
    config.boot_timeout = Some(Duration::from_secs(40));
    let started = tokio::time::Instant::now();

    // When
    let attempt = failed_attempt(validator.run(&config).await);

    // Then: 3단계는 남은 10초만 기다리고, 그래도 기록은 남음
    assert_eq!(attempt.phases.len(), 3);
    assert!(started.elapsed() <= Duration::from_secs(41));
}

#[tokio::test(start_paused = true)]
async fn empty_target_fails_before_creating_anything() {
    let lab = MemoryLab::new();
    let validator = validator(&lab, FakeCallbacks::default());
    let mut config = run_config();
    config.target.clear();

    let err = validator.run(&config).await.unwrap_err();

    assert!(matches!(err, ValidateError::InvalidConfig(_)));
    assert!(lab.calls().is_empty());
}
