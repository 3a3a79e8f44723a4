//! pxelab.toml 통합 설정 테스트
//!
//! - pxelab.toml.example 파싱 테스트
//! - 환경변수 우선순위 테스트
//! - 파일 로딩 에러 테스트

use std::io::Write;

use pxelab_core::config::PxelabConfig;
use pxelab_core::error::{ConfigError, PxelabError};

const EXAMPLE: &str = include_str!("../../../pxelab.toml.example");

// =============================================================================
// pxelab.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = PxelabConfig::parse(EXAMPLE).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.state_dir, "/var/lib/pxelab/state");
    assert_eq!(config.drivers.run_dir, "/run/pxelab");
    assert_eq!(config.tunnel.stable_threshold_secs, 10);
    assert_eq!(config.validation.callback_path, "/api/v1/boot-events");
}

#[test]
fn example_config_matches_defaults() {
    let example = PxelabConfig::parse(EXAMPLE).expect("should parse");
    let defaults = PxelabConfig::default();

    let example = toml::to_string(&example).expect("serialize example");
    let defaults = toml::to_string(&defaults).expect("serialize defaults");
    assert_eq!(example, defaults, "example file drifted from Default impls");
}

#[test]
fn empty_file_uses_defaults_and_validates() {
    let config = PxelabConfig::parse("").expect("empty config should parse");
    config.validate().expect("defaults should be valid");
}

// =============================================================================
// 파일 로딩
// =============================================================================

#[tokio::test]
async fn load_reads_and_validates_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[validation]\npoll_interval_ms = 1500").expect("write");

    let config = PxelabConfig::from_file(file.path())
        .await
        .expect("should load");
    assert_eq!(config.validation.poll_interval_ms, 1500);
}

#[tokio::test]
async fn load_rejects_invalid_value_in_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[validation]\npoll_interval_ms = 50").expect("write");

    let err = PxelabConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        PxelabError::Config(ConfigError::InvalidValue { .. })
    ));
}

// =============================================================================
// 환경변수 우선순위
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[tunnel]
supervise = true
"#;

    let original = std::env::var("PXELAB_TUNNEL_SUPERVISE").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("PXELAB_TUNNEL_SUPERVISE", "false");
    }

    let mut config = PxelabConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.tunnel.supervise;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("PXELAB_TUNNEL_SUPERVISE", val),
            None => std::env::remove_var("PXELAB_TUNNEL_SUPERVISE"),
        }
    }

    assert!(!result);
}

#[test]
#[serial_test::serial]
fn env_override_numeric_field() {
    let original = std::env::var("PXELAB_VALIDATION_BOOT_TIMEOUT_SECS").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("PXELAB_VALIDATION_BOOT_TIMEOUT_SECS", "45");
    }

    let mut config = PxelabConfig::parse("").expect("should parse");
    config.apply_env_overrides();
    let result = config.validation.boot_timeout_secs;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("PXELAB_VALIDATION_BOOT_TIMEOUT_SECS", val),
            None => std::env::remove_var("PXELAB_VALIDATION_BOOT_TIMEOUT_SECS"),
        }
    }

    assert_eq!(result, 45);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_then_validates() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[general]\nlog_level = \"info\"").expect("write");

    let original = std::env::var("PXELAB_GENERAL_LOG_LEVEL").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("PXELAB_GENERAL_LOG_LEVEL", "verbose");
    }

    let result = PxelabConfig::load(file.path()).await;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("PXELAB_GENERAL_LOG_LEVEL", val),
            None => std::env::remove_var("PXELAB_GENERAL_LOG_LEVEL"),
        }
    }

    let err = result.expect_err("invalid level from env must be rejected");
    assert!(err.to_string().contains("log_level"));
}
