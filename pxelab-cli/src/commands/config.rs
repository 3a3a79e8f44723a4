//! `pxelab config` command handler and effective-config loading

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use pxelab_core::config::PxelabConfig;

use crate::cli::{ConfigAction, ConfigArgs, DEFAULT_CONFIG_PATH};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Loads the effective configuration.
///
/// Priority: `--log-level` > `PXELAB_*` env vars > config file > defaults.
/// Without `--config`, a missing `pxelab.toml` in the working directory
/// falls back to defaults; an explicit path must exist.
pub async fn load_effective(
    path: Option<&Path>,
    log_level: Option<&str>,
) -> Result<PxelabConfig, CliError> {
    let mut config = match path {
        Some(path) => PxelabConfig::load(path).await?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if tokio::fs::try_exists(default).await.unwrap_or(false) {
                PxelabConfig::load(default).await?
            } else {
                debug!("no {DEFAULT_CONFIG_PATH} found, using defaults");
                let mut config = PxelabConfig::default();
                config.apply_env_overrides();
                config.validate()?;
                config
            }
        }
    };

    if let Some(level) = log_level {
        config.general.log_level = level.to_owned();
        config.validate()?;
    }
    Ok(config)
}

fn source_name(path: Option<&Path>) -> String {
    path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH))
        .display()
        .to_string()
}

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: Option<&Path>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

async fn execute_validate(config_path: Option<&Path>, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %source_name(config_path), "validating configuration");

    let report = match load_effective(config_path, None).await {
        Ok(_) => ConfigValidationReport {
            source: source_name(config_path),
            valid: true,
            errors: Vec::new(),
        },
        Err(e) => ConfigValidationReport {
            source: source_name(config_path),
            valid: false,
            errors: vec![e.to_string()],
        },
    };

    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

async fn execute_show(
    config_path: Option<&Path>,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = load_effective(config_path, None).await?;
    let report = ConfigReport {
        source: source_name(config_path),
        section: section.clone(),
        config_toml: render_section(&config, section.as_deref())?,
    };
    writer.render(&report)
}

/// Serializes the whole configuration or one section of it as TOML.
pub fn render_section(config: &PxelabConfig, section: Option<&str>) -> Result<String, CliError> {
    let rendered = match section {
        None => toml::to_string_pretty(config),
        Some("general") => toml::to_string_pretty(&config.general),
        Some("drivers") => toml::to_string_pretty(&config.drivers),
        Some("tunnel") => toml::to_string_pretty(&config.tunnel),
        Some("validation") => toml::to_string_pretty(&config.validation),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section '{other}', expected one of: general, drivers, tunnel, validation"
            )));
        }
    };
    rendered.map_err(|e| CliError::Command(format!("failed to serialize configuration: {e}")))
}

#[derive(Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.valid {
            writeln!(w, "Configuration is valid: {}", self.source)
        } else {
            writeln!(w, "Configuration is invalid: {}", self.source)?;
            for error in &self.errors {
                writeln!(w, "  - {error}")?;
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
pub struct ConfigReport {
    pub source: String,
    pub section: Option<String>,
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        match &self.section {
            Some(section) => writeln!(w, "# {} [{section}]", self.source)?,
            None => writeln!(w, "# {}", self.source)?,
        }
        write!(w, "{}", self.config_toml)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[tokio::test]
    async fn test_explicit_missing_path_is_an_error() {
        let err = load_effective(Some(Path::new("/nonexistent/pxelab.toml")), None)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2, "missing explicit config is a config error");
    }

    #[tokio::test]
    async fn test_log_level_flag_overrides_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pxelab.toml");
        std::fs::write(&path, "[general]\nlog_level = \"warn\"\n").expect("write");

        let config = load_effective(Some(&path), Some("debug")).await.expect("load");

        assert_eq!(config.general.log_level, "debug");
    }

    #[tokio::test]
    async fn test_invalid_log_level_flag_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pxelab.toml");
        std::fs::write(&path, "").expect("write");

        let err = load_effective(Some(&path), Some("loud")).await.unwrap_err();
        assert!(err.to_string().contains("general.log_level"));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_override_applies_on_top_of_file() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pxelab.toml");
        std::fs::write(&path, "[tunnel]\nmax_backoff_ms = 8000\n").expect("write");
        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::set_var("PXELAB_TUNNEL_MAX_BACKOFF_MS", "4000") };

        // When
        let result = load_effective(Some(&path), None).await;
        unsafe { std::env::remove_var("PXELAB_TUNNEL_MAX_BACKOFF_MS") };

        // Then
        let config = result.expect("load");
        assert_eq!(config.tunnel.max_backoff_ms, 4000);
    }

    #[test]
    fn test_render_known_section() {
        let config = PxelabConfig::default();
        let toml = render_section(&config, Some("tunnel")).expect("render");
        assert!(toml.contains("min_backoff_ms = 500"));
        assert!(!toml.contains("log_level"));
    }

    #[test]
    fn test_render_unknown_section_fails() {
        let err = render_section(&PxelabConfig::default(), Some("ebpf")).unwrap_err();
        assert!(err.to_string().contains("unknown section 'ebpf'"));
    }

    #[test]
    fn test_render_full_config_round_trips() {
        let config = PxelabConfig::default();
        let toml = render_section(&config, None).expect("render");
        let parsed = PxelabConfig::parse(&toml).expect("rendered config parses");
        assert_eq!(parsed.validation.callback_path, config.validation.callback_path);
    }
}
