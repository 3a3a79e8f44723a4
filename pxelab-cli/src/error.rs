//! CLI-specific error types and exit code mapping

use pxelab_core::error::PxelabError;
use pxelab_lifecycle::{ProvisionError, StoreError, TeardownError};
use pxelab_tunnel::TunnelError;
use pxelab_validate::ValidateError;

/// CLI-specific error type.
///
/// Provisioning, teardown and validation failures map to distinct exit codes
/// so scripts can tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Scenario file could not be read or is invalid.
    #[error("scenario error: {0}")]
    Scenario(String),

    /// Provisioning failed; created resources were rolled back.
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Some resources could not be released.
    #[error("{0}")]
    Teardown(#[from] TeardownError),

    /// The boot attempt did not satisfy every configured phase.
    #[error("{0}")]
    Validation(String),

    /// Environment record store failure.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Tunnel to the boot service could not be opened.
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from pxelab-core.
    #[error("{0}")]
    Core(#[from] PxelabError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                          |
    /// |------|----------------------------------|
    /// | 0    | Success                          |
    /// | 1    | General / command error          |
    /// | 2    | Configuration or scenario error  |
    /// | 3    | Provisioning failure             |
    /// | 4    | Teardown failure                 |
    /// | 5    | Boot validation failure          |
    /// | 10   | IO error                         |
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Scenario(_) => 2,
            Self::Provision(ProvisionError::Invalid(_)) => 2,
            Self::Provision(_) => 3,
            Self::Teardown(_) => 4,
            Self::Validation(_) => 5,
            Self::Io(_) => 10,
            Self::Core(PxelabError::Config(_) | PxelabError::Spec(_)) => 2,
            Self::Core(PxelabError::Io(_)) => 10,
            Self::Store(StoreError::Io(_)) => 10,
            Self::Store(_)
            | Self::Tunnel(_)
            | Self::Command(_)
            | Self::JsonSerialize(_)
            | Self::Core(_) => 1,
        }
    }
}

impl From<ValidateError> for CliError {
    fn from(e: ValidateError) -> Self {
        match e {
            ValidateError::InvalidConfig(reason) => Self::Scenario(reason),
            failed @ ValidateError::Failed(_) => Self::Validation(failed.to_string()),
        }
    }
}
