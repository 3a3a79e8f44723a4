//! 부트 검증 실행 설정
//!
//! [`RunConfig`]는 호출자가 채우는 입력이고, 비어 있는 값은
//! [`RunConfig::normalized`]가 기본값으로 채운 [`RunSettings`]로 바뀝니다.

use std::time::Duration;

use pxelab_core::config::ValidationConfig;
use pxelab_core::types::{Phase, SelectionExpectation, VmSpec};

use crate::error::ValidateError;

/// 전체 부트 시도 기본 타임아웃
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// 임대 대기 기본 타임아웃
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30);
/// 콜백 대기 기본 타임아웃
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// 기본 폴링 간격
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// 폴링 간격 하한
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// 폴링 간격 상한
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// 기본 VM 메모리 (MiB)
pub const DEFAULT_MEMORY_MIB: u32 = 2048;
/// 기본 vCPU 수
pub const DEFAULT_VCPUS: u32 = 2;

/// 부트 검증 실행 입력
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// 대상 VM 이름 (DHCP 호스트명으로도 사용)
    pub target: String,
    /// 대상 VM 명세 (네트워크, MAC, 크기)
    pub vm: VmSpec,
    pub boot_timeout: Option<Duration>,
    pub lease_timeout: Option<Duration>,
    pub callback_timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    /// 선택 검증 기대값 (비어 있으면 4단계를 건너뜀)
    pub expect: Option<SelectionExpectation>,
}

impl RunConfig {
    /// 설정 파일의 `[validation]` 섹션으로 입력을 만듭니다.
    pub fn from_core(
        core: &ValidationConfig,
        target: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            vm: VmSpec {
                memory_mib: core.vm_memory_mib,
                vcpus: core.vm_vcpus,
                network: network.into(),
                mac: None,
            },
            boot_timeout: Some(Duration::from_secs(core.boot_timeout_secs)),
            lease_timeout: Some(Duration::from_secs(core.lease_timeout_secs)),
            callback_timeout: Some(Duration::from_secs(core.callback_timeout_secs)),
            poll_interval: Some(Duration::from_millis(core.poll_interval_ms)),
            expect: None,
        }
    }

    /// 기본값을 채우고 입력을 검증합니다.
    ///
    /// 대상 이름이 비어 있으면 실패합니다. 0으로 지정된 메모리/vCPU와
    /// 0 또는 미지정 타임아웃은 기본값으로 바뀝니다.
    pub fn normalized(&self) -> Result<RunSettings, ValidateError> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(ValidateError::InvalidConfig(
                "target must not be empty".to_owned(),
            ));
        }
        if self.vm.network.trim().is_empty() {
            return Err(ValidateError::InvalidConfig(
                "vm network must not be empty".to_owned(),
            ));
        }

        let mut vm = self.vm.clone();
        if vm.memory_mib == 0 {
            vm.memory_mib = DEFAULT_MEMORY_MIB;
        }
        if vm.vcpus == 0 {
            vm.vcpus = DEFAULT_VCPUS;
        }

        let expect = self.expect.clone().filter(|e| !e.is_empty());

        Ok(RunSettings {
            target: target.to_owned(),
            vm,
            boot_timeout: or_default(self.boot_timeout, DEFAULT_BOOT_TIMEOUT),
            lease_timeout: or_default(self.lease_timeout, DEFAULT_LEASE_TIMEOUT),
            callback_timeout: or_default(self.callback_timeout, DEFAULT_CALLBACK_TIMEOUT),
            poll_interval: or_default(self.poll_interval, DEFAULT_POLL_INTERVAL)
                .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL),
            expect,
        })
    }
}

fn or_default(value: Option<Duration>, default: Duration) -> Duration {
    value.filter(|d| !d.is_zero()).unwrap_or(default)
}

/// 기본값이 채워진 실행 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub target: String,
    pub vm: VmSpec,
    pub boot_timeout: Duration,
    pub lease_timeout: Duration,
    pub callback_timeout: Duration,
    pub poll_interval: Duration,
    pub expect: Option<SelectionExpectation>,
}

impl RunSettings {
    /// 이 실행에서 검사할 단계 (고정 순서)
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = vec![
            Phase::LeaseAcquired,
            Phase::BootFileFetched,
            Phase::CallbackObserved,
        ];
        if self.expect.is_some() {
            phases.push(Phase::SelectionVerified);
        }
        phases
    }
}
