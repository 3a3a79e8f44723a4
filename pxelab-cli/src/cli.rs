//! CLI argument parsing using clap derive API
//!
//! Purely declarative; no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "pxelab.toml";

/// pxelab -- disposable network-boot test environments.
///
/// Use `pxelab <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "pxelab", version, about, long_about = None)]
pub struct Cli {
    /// Path to the pxelab.toml configuration file [default: pxelab.toml].
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage provisioned environments.
    Env(EnvArgs),

    /// Run one boot attempt against an existing environment.
    Validate(ValidateArgs),

    /// Provision, validate and tear down in one go.
    Run(RunArgs),

    /// Issue throwaway mTLS material for a boot service.
    Certs(CertsArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- env ----

#[derive(Args, Debug)]
pub struct EnvArgs {
    #[command(subcommand)]
    pub action: EnvAction,
}

#[derive(Subcommand, Debug)]
pub enum EnvAction {
    /// Provision the environment described by a scenario file and record it.
    Create {
        /// Scenario file (YAML).
        scenario: PathBuf,
    },
    /// Tear down an environment and delete its record.
    Destroy {
        /// Environment id or unique id prefix.
        id: String,
        /// Delete the record even when some resources could not be released.
        #[arg(long)]
        force: bool,
    },
    /// List recorded environments.
    List,
    /// Show one recorded environment.
    Show {
        /// Environment id or unique id prefix.
        id: String,
    },
}

// ---- validate ----

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Environment id or unique id prefix.
    pub id: String,

    /// Scenario file whose `boot` section describes the attempt.
    pub scenario: PathBuf,
}

// ---- run ----

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario file (YAML).
    pub scenario: PathBuf,

    /// Keep the environment after the boot attempt instead of tearing it down.
    #[arg(long)]
    pub keep: bool,
}

// ---- certs ----

#[derive(Args, Debug)]
pub struct CertsArgs {
    /// Directory the PEM files are written to.
    pub out_dir: PathBuf,

    /// Server subject alternative name (IP or DNS). Repeatable.
    #[arg(long = "san", required = true)]
    pub sans: Vec<String>,
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, drivers, tunnel, validation).
        #[arg(long)]
        section: Option<String>,
    },
}
