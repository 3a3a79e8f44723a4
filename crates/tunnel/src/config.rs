//! Tunnel settings.
//!
//! [`TunnelConfig`] is derived from the `[tunnel]` section of `pxelab.toml`
//! plus the remote endpoint of one environment.
//!
//! ```ignore
//! let remote = RemoteEndpoint::from_environment(&env)?;
//! let config = TunnelConfig::from_core(&pxelab_config.tunnel, remote);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use pxelab_core::types::Environment;

use crate::error::TunnelError;

/// Service inside an environment's cluster that the tunnel forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub kubeconfig: PathBuf,
    pub namespace: String,
    pub service: String,
    pub port: u16,
}

impl RemoteEndpoint {
    /// The deployed service of a provisioned environment.
    pub fn from_environment(env: &Environment) -> Result<Self, TunnelError> {
        let kubeconfig = env.kubeconfig.clone().ok_or_else(|| {
            TunnelError::InvalidConfig(format!("environment {} has no cluster credential", env.id))
        })?;
        if env.deployment.is_none() {
            return Err(TunnelError::InvalidConfig(format!(
                "environment {} has no deployed service",
                env.id
            )));
        }
        Ok(Self {
            kubeconfig,
            namespace: env.spec.deploy.namespace.clone(),
            service: env.spec.deploy.service.clone(),
            port: env.spec.deploy.port,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Fixed local port; an ephemeral one is picked when `None`.
    pub local_port: Option<u16>,
    pub remote: RemoteEndpoint,
    /// Restart the backend when it exits.
    pub supervise: bool,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// A backend that ran at least this long resets the backoff.
    pub stable_threshold: Duration,
    /// HTTP path used to decide whether the local endpoint is being served.
    pub probe_path: String,
    pub ready_timeout: Duration,
}

impl TunnelConfig {
    pub fn new(remote: RemoteEndpoint) -> Self {
        Self::from_core(&pxelab_core::config::TunnelConfig::default(), remote)
    }

    pub fn from_core(core: &pxelab_core::config::TunnelConfig, remote: RemoteEndpoint) -> Self {
        Self {
            local_port: None,
            remote,
            supervise: core.supervise,
            min_backoff: core.min_backoff(),
            max_backoff: core.max_backoff(),
            stable_threshold: core.stable_threshold(),
            probe_path: core.probe_path.clone(),
            ready_timeout: core.ready_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.min_backoff.is_zero() {
            return Err(TunnelError::InvalidConfig(
                "min_backoff must be greater than 0".to_owned(),
            ));
        }
        if self.min_backoff > self.max_backoff {
            return Err(TunnelError::InvalidConfig(format!(
                "min_backoff ({:?}) exceeds max_backoff ({:?})",
                self.min_backoff, self.max_backoff
            )));
        }
        if !self.probe_path.starts_with('/') {
            return Err(TunnelError::InvalidConfig(format!(
                "probe_path '{}' must start with '/'",
                self.probe_path
            )));
        }
        if self.remote.port == 0 {
            return Err(TunnelError::InvalidConfig(
                "remote port must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}
