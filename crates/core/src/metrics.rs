//! 메트릭 상수
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다. 익스포터는 설치하지 않으며,
//! 임베딩하는 쪽에서 `metrics` 레코더를 설치하면 수집됩니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `pxelab_`
//! - 모듈명: `env_`, `tunnel_`, `boot_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 실패한 프로비저닝 단계 레이블 키
pub const LABEL_STEP: &str = "step";

/// 리소스 종류 레이블 키
pub const LABEL_RESOURCE: &str = "resource";

/// 부트 단계 레이블 키
pub const LABEL_PHASE: &str = "phase";

/// 결과 레이블 키 (success, failure)
pub const LABEL_OUTCOME: &str = "outcome";

// ─── 환경 라이프사이클 ──────────────────────────────────────────────

/// 프로비저닝 시도 수
pub const ENV_PROVISION_TOTAL: &str = "pxelab_env_provision_total";

/// 프로비저닝 실패 수 (step 레이블)
pub const ENV_PROVISION_FAILURES_TOTAL: &str = "pxelab_env_provision_failures_total";

/// 프로비저닝 소요 시간
pub const ENV_PROVISION_DURATION_SECONDS: &str = "pxelab_env_provision_duration_seconds";

/// 해제 중 리소스 정리 실패 수 (resource 레이블)
pub const ENV_TEARDOWN_FAILURES_TOTAL: &str = "pxelab_env_teardown_failures_total";

// ─── 터널 ───────────────────────────────────────────────────────────

/// 백엔드 재시작 수
pub const TUNNEL_RESTARTS_TOTAL: &str = "pxelab_tunnel_restarts_total";

/// 현재 재연결 지연 (초)
pub const TUNNEL_BACKOFF_SECONDS: &str = "pxelab_tunnel_backoff_seconds";

/// 활성 백엔드 수 (0 또는 1)
pub const TUNNEL_BACKENDS_ACTIVE: &str = "pxelab_tunnel_backends_active";

// ─── 부트 검증 ──────────────────────────────────────────────────────

/// 부트 시도 수 (outcome 레이블)
pub const BOOT_ATTEMPTS_TOTAL: &str = "pxelab_boot_attempts_total";

/// 미충족 단계 수 (phase 레이블)
pub const BOOT_PHASE_FAILURES_TOTAL: &str = "pxelab_boot_phase_failures_total";

/// 부트 시도 소요 시간
pub const BOOT_DURATION_SECONDS: &str = "pxelab_boot_duration_seconds";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더가 없으면 아무 일도 하지 않습니다. 레코더를 설치한 뒤 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

    // 환경 라이프사이클
    describe_counter!(ENV_PROVISION_TOTAL, "Total environment provisioning attempts");
    describe_counter!(
        ENV_PROVISION_FAILURES_TOTAL,
        "Provisioning attempts that failed and were rolled back, by failed step"
    );
    describe_histogram!(
        ENV_PROVISION_DURATION_SECONDS,
        Unit::Seconds,
        "Time to provision a complete environment"
    );
    describe_counter!(
        ENV_TEARDOWN_FAILURES_TOTAL,
        "Resources that could not be deleted during teardown, by resource kind"
    );

    // 터널
    describe_counter!(TUNNEL_RESTARTS_TOTAL, "Tunnel backend processes restarted");
    describe_gauge!(
        TUNNEL_BACKOFF_SECONDS,
        Unit::Seconds,
        "Delay before the next tunnel reconnect"
    );
    describe_gauge!(TUNNEL_BACKENDS_ACTIVE, "Running tunnel backend processes");

    // 부트 검증
    describe_counter!(BOOT_ATTEMPTS_TOTAL, "Boot attempts, by outcome");
    describe_counter!(
        BOOT_PHASE_FAILURES_TOTAL,
        "Boot phases left unsatisfied, by phase"
    );
    describe_histogram!(
        BOOT_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time of one boot attempt including cleanup"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        ENV_PROVISION_TOTAL,
        ENV_PROVISION_FAILURES_TOTAL,
        ENV_PROVISION_DURATION_SECONDS,
        ENV_TEARDOWN_FAILURES_TOTAL,
        TUNNEL_RESTARTS_TOTAL,
        TUNNEL_BACKOFF_SECONDS,
        TUNNEL_BACKENDS_ACTIVE,
        BOOT_ATTEMPTS_TOTAL,
        BOOT_PHASE_FAILURES_TOTAL,
        BOOT_DURATION_SECONDS,
    ];

    #[test]
    fn metric_names_share_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(name.starts_with("pxelab_"), "{name}");
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn describe_all_without_recorder_is_noop() {
        describe_all();
    }
}
