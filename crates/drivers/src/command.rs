//! External command execution.
//!
//! Every host driver shells out to a CLI tool (`ip`, `virsh`, `dnsmasq`, `kind`,
//! `kubectl`). [`CommandRunner`] wraps one such tool with a fixed set of leading
//! arguments and a per-invocation timeout.

use std::process::Stdio;
use std::time::Duration;

use pxelab_core::error::DriverError;
use pxelab_core::types::ResourceKind;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Maximum length accepted for resource names passed on a command line.
const MAX_NAME_LEN: usize = 63;

/// Validates a resource name before it reaches a command line.
///
/// Names must be 1-63 characters of `[A-Za-z0-9._-]` and must not start with `-`,
/// which keeps them from being parsed as flags.
pub fn validate_name(kind: ResourceKind, name: &str) -> Result<(), DriverError> {
    let reason = if name.is_empty() || name.len() > MAX_NAME_LEN {
        Some(format!("length {} (must be 1-{MAX_NAME_LEN})", name.len()))
    } else if name.starts_with('-') {
        Some("must not start with '-'".to_owned())
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("contains characters outside [A-Za-z0-9._-]".to_owned())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DriverError::Failed {
            kind,
            name: name.to_owned(),
            reason: format!("invalid name: {reason}"),
        }),
        None => Ok(()),
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Human readable command line.
    pub command: String,
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Exit status description.
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Converts a non-zero exit into [`DriverError::CommandFailed`].
    pub fn into_result(self) -> Result<Self, DriverError> {
        if self.success {
            Ok(self)
        } else {
            Err(DriverError::CommandFailed {
                command: self.command,
                status: self.status,
                stderr: self.stderr.trim().to_owned(),
            })
        }
    }

    /// Case-insensitive search of stderr for any of `needles`.
    pub fn stderr_mentions(&self, needles: &[&str]) -> bool {
        let haystack = self.stderr.to_ascii_lowercase();
        needles
            .iter()
            .any(|n| haystack.contains(&n.to_ascii_lowercase()))
    }
}

/// Runs one external program with fixed leading arguments.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl CommandRunner {
    /// Creates a runner for `program` with the given timeout.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            timeout,
        }
    }

    /// Adds arguments placed before every invocation (e.g. `-c qemu:///system`).
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the command and fails on non-zero exit.
    pub async fn run(&self, args: &[&str]) -> Result<CommandOutput, DriverError> {
        self.output(args, None).await?.into_result()
    }

    /// Runs the command with `input` written to stdin and fails on non-zero exit.
    pub async fn run_with_stdin(
        &self,
        args: &[&str],
        input: &str,
    ) -> Result<CommandOutput, DriverError> {
        self.output(args, Some(input)).await?.into_result()
    }

    /// Runs the command and returns its output regardless of exit status.
    ///
    /// Only spawn failures, I/O errors and timeouts are reported as errors.
    /// The child is killed if the timeout elapses.
    pub async fn output(
        &self,
        args: &[&str],
        input: Option<&str>,
    ) -> Result<CommandOutput, DriverError> {
        let command = self.describe(args);
        debug!(command = %command, "running command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| DriverError::Spawn {
            command: command.clone(),
            reason: e.to_string(),
        })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DriverError::Timeout {
                    command,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        Ok(CommandOutput {
            command,
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts = Vec::with_capacity(1 + self.base_args.len() + args.len());
        parts.push(self.program.as_str());
        parts.extend(self.base_args.iter().map(String::as_str));
        parts.extend(args.iter().copied());
        parts.join(" ")
    }
}
