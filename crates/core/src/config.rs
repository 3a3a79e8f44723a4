//! 설정 관리 — pxelab.toml 파싱 및 런타임 설정
//!
//! [`PxelabConfig`]는 모든 크레이트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`PXELAB_TUNNEL_SUPERVISE=false` 형식)
//! 3. 설정 파일 (`pxelab.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), pxelab_core::error::PxelabError> {
//! use pxelab_core::config::PxelabConfig;
//!
//! let config = PxelabConfig::load("pxelab.toml").await?;
//! let config = PxelabConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, PxelabError};

/// 폴링 간격 허용 범위 (밀리초)
pub const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 1000..=2000;

/// pxelab 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PxelabConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 외부 도구 설정
    #[serde(default)]
    pub drivers: DriversConfig,
    /// 터널 설정
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// 부트 검증 설정
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl PxelabConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PxelabError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, PxelabError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PxelabError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                PxelabError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, PxelabError> {
        toml::from_str(toml_str).map_err(|e| {
            PxelabError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `PXELAB_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "PXELAB_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "PXELAB_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.state_dir, "PXELAB_GENERAL_STATE_DIR");
        override_string(&mut self.general.work_root, "PXELAB_GENERAL_WORK_ROOT");

        // Drivers
        override_string(&mut self.drivers.ip_bin, "PXELAB_DRIVERS_IP_BIN");
        override_string(&mut self.drivers.virsh_bin, "PXELAB_DRIVERS_VIRSH_BIN");
        override_string(
            &mut self.drivers.virt_install_bin,
            "PXELAB_DRIVERS_VIRT_INSTALL_BIN",
        );
        override_string(&mut self.drivers.dnsmasq_bin, "PXELAB_DRIVERS_DNSMASQ_BIN");
        override_string(&mut self.drivers.kind_bin, "PXELAB_DRIVERS_KIND_BIN");
        override_string(&mut self.drivers.kubectl_bin, "PXELAB_DRIVERS_KUBECTL_BIN");
        override_string(&mut self.drivers.libvirt_uri, "PXELAB_DRIVERS_LIBVIRT_URI");
        override_string(&mut self.drivers.run_dir, "PXELAB_DRIVERS_RUN_DIR");
        override_u64(
            &mut self.drivers.command_timeout_secs,
            "PXELAB_DRIVERS_COMMAND_TIMEOUT_SECS",
        );

        // Tunnel
        override_bool(&mut self.tunnel.supervise, "PXELAB_TUNNEL_SUPERVISE");
        override_u64(
            &mut self.tunnel.min_backoff_ms,
            "PXELAB_TUNNEL_MIN_BACKOFF_MS",
        );
        override_u64(
            &mut self.tunnel.max_backoff_ms,
            "PXELAB_TUNNEL_MAX_BACKOFF_MS",
        );
        override_u64(
            &mut self.tunnel.stable_threshold_secs,
            "PXELAB_TUNNEL_STABLE_THRESHOLD_SECS",
        );
        override_string(&mut self.tunnel.probe_path, "PXELAB_TUNNEL_PROBE_PATH");
        override_u64(
            &mut self.tunnel.ready_timeout_secs,
            "PXELAB_TUNNEL_READY_TIMEOUT_SECS",
        );

        // Validation
        override_u64(
            &mut self.validation.boot_timeout_secs,
            "PXELAB_VALIDATION_BOOT_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.validation.lease_timeout_secs,
            "PXELAB_VALIDATION_LEASE_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.validation.callback_timeout_secs,
            "PXELAB_VALIDATION_CALLBACK_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.validation.poll_interval_ms,
            "PXELAB_VALIDATION_POLL_INTERVAL_MS",
        );
        override_u32(
            &mut self.validation.vm_memory_mib,
            "PXELAB_VALIDATION_VM_MEMORY_MIB",
        );
        override_u32(&mut self.validation.vm_vcpus, "PXELAB_VALIDATION_VM_VCPUS");
        override_string(
            &mut self.validation.callback_path,
            "PXELAB_VALIDATION_CALLBACK_PATH",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), PxelabError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.general.state_dir.is_empty() {
            return Err(invalid("general.state_dir", "must not be empty".to_owned()));
        }
        if self.general.work_root.is_empty() {
            return Err(invalid("general.work_root", "must not be empty".to_owned()));
        }

        if self.drivers.command_timeout_secs == 0 {
            return Err(invalid(
                "drivers.command_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.tunnel.min_backoff_ms == 0 {
            return Err(invalid(
                "tunnel.min_backoff_ms",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.tunnel.max_backoff_ms < self.tunnel.min_backoff_ms {
            return Err(invalid(
                "tunnel.max_backoff_ms",
                format!(
                    "must be at least min_backoff_ms ({})",
                    self.tunnel.min_backoff_ms
                ),
            ));
        }
        if !self.tunnel.probe_path.starts_with('/') {
            return Err(invalid(
                "tunnel.probe_path",
                "must start with '/'".to_owned(),
            ));
        }

        if !POLL_INTERVAL_RANGE_MS.contains(&self.validation.poll_interval_ms) {
            return Err(invalid(
                "validation.poll_interval_ms",
                format!(
                    "must be between {} and {}",
                    POLL_INTERVAL_RANGE_MS.start(),
                    POLL_INTERVAL_RANGE_MS.end()
                ),
            ));
        }
        if self.validation.boot_timeout_secs == 0 {
            return Err(invalid(
                "validation.boot_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.validation.vm_memory_mib < 256 {
            return Err(invalid(
                "validation.vm_memory_mib",
                "must be at least 256".to_owned(),
            ));
        }
        if self.validation.vm_vcpus == 0 {
            return Err(invalid(
                "validation.vm_vcpus",
                "must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> PxelabError {
    PxelabError::Config(ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    })
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 환경 레코드 저장 디렉토리
    pub state_dir: String,
    /// 환경별 작업 디렉토리 루트
    pub work_root: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            state_dir: "/var/lib/pxelab/state".to_owned(),
            work_root: "/var/lib/pxelab/envs".to_owned(),
        }
    }
}

/// 외부 도구 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriversConfig {
    /// `ip` 바이너리
    pub ip_bin: String,
    /// `virsh` 바이너리
    pub virsh_bin: String,
    /// `virt-install` 바이너리
    pub virt_install_bin: String,
    /// `dnsmasq` 바이너리
    pub dnsmasq_bin: String,
    /// `kind` 바이너리
    pub kind_bin: String,
    /// `kubectl` 바이너리
    pub kubectl_bin: String,
    /// libvirt 연결 URI
    pub libvirt_uri: String,
    /// 부트 서비스 런타임 파일 디렉토리 (pid, lease, conf)
    pub run_dir: String,
    /// 외부 명령 타임아웃 (초)
    pub command_timeout_secs: u64,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            ip_bin: "ip".to_owned(),
            virsh_bin: "virsh".to_owned(),
            virt_install_bin: "virt-install".to_owned(),
            dnsmasq_bin: "dnsmasq".to_owned(),
            kind_bin: "kind".to_owned(),
            kubectl_bin: "kubectl".to_owned(),
            libvirt_uri: "qemu:///system".to_owned(),
            run_dir: "/run/pxelab".to_owned(),
            command_timeout_secs: 600,
        }
    }
}

impl DriversConfig {
    /// 외부 명령 타임아웃
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// 터널 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// 백엔드 종료 시 자동 재시작 여부
    pub supervise: bool,
    /// 최소 재연결 지연 (밀리초)
    pub min_backoff_ms: u64,
    /// 최대 재연결 지연 (밀리초)
    pub max_backoff_ms: u64,
    /// 이 시간 이상 유지된 백엔드는 안정적으로 간주 (초)
    pub stable_threshold_secs: u64,
    /// 준비 확인 HTTP 경로
    pub probe_path: String,
    /// 준비 대기 타임아웃 (초)
    pub ready_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            supervise: true,
            min_backoff_ms: 500,
            max_backoff_ms: 30_000,
            stable_threshold_secs: 10,
            probe_path: "/healthz".to_owned(),
            ready_timeout_secs: 60,
        }
    }
}

impl TunnelConfig {
    /// 최소 재연결 지연
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    /// 최대 재연결 지연
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// 안정 판정 기준 시간
    pub fn stable_threshold(&self) -> Duration {
        Duration::from_secs(self.stable_threshold_secs)
    }

    /// 준비 대기 타임아웃
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// 부트 검증 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// 전체 부트 시도 타임아웃 (초)
    pub boot_timeout_secs: u64,
    /// 임대 대기 타임아웃 (초)
    pub lease_timeout_secs: u64,
    /// 콜백 대기 타임아웃 (초)
    pub callback_timeout_secs: u64,
    /// 폴링 간격 (밀리초, 1000~2000)
    pub poll_interval_ms: u64,
    /// VM 메모리 (MiB)
    pub vm_memory_mib: u32,
    /// VM vCPU 수
    pub vm_vcpus: u32,
    /// 콜백 조회 HTTP 경로 (터널 기준)
    pub callback_path: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            boot_timeout_secs: 300,
            lease_timeout_secs: 30,
            callback_timeout_secs: 120,
            poll_interval_ms: 1000,
            vm_memory_mib: 2048,
            vm_vcpus: 2,
            callback_path: "/api/v1/boot-events".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
