//! Backing transport processes.
//!
//! A [`BackendLauncher`] starts one process that forwards a local address to a
//! [`RemoteEndpoint`]. The tunnel owns at most one [`Backend`] at a time and
//! replaces it when it exits.

use std::future::Future;
use std::net::SocketAddr;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::RemoteEndpoint;
use crate::error::TunnelError;

/// How a backend process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendExit {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
}

/// A running forwarding process.
pub trait Backend: Send + 'static {
    /// Non-blocking exit check.
    fn try_wait(&mut self) -> std::io::Result<Option<BackendExit>>;

    /// Requests termination without waiting for it.
    fn start_kill(&mut self) -> std::io::Result<()>;

    /// Waits until the process has exited and released its resources.
    fn wait(&mut self) -> impl Future<Output = std::io::Result<BackendExit>> + Send;

    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;
}

/// Starts backends for a tunnel.
pub trait BackendLauncher: Send + Sync + 'static {
    type Backend: Backend;

    fn launch(
        &self,
        local: SocketAddr,
        remote: &RemoteEndpoint,
    ) -> Result<Self::Backend, TunnelError>;
}

/// `kubectl port-forward` against the environment's service.
#[derive(Debug, Clone)]
pub struct KubectlPortForward {
    kubectl: String,
}

impl KubectlPortForward {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    pub fn args(&self, local: SocketAddr, remote: &RemoteEndpoint) -> Vec<String> {
        vec![
            "--kubeconfig".to_owned(),
            remote.kubeconfig.display().to_string(),
            "-n".to_owned(),
            remote.namespace.clone(),
            "port-forward".to_owned(),
            "--address".to_owned(),
            local.ip().to_string(),
            format!("svc/{}", remote.service),
            format!("{}:{}", local.port(), remote.port),
        ]
    }
}

impl Default for KubectlPortForward {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl BackendLauncher for KubectlPortForward {
    type Backend = ChildBackend;

    fn launch(
        &self,
        local: SocketAddr,
        remote: &RemoteEndpoint,
    ) -> Result<ChildBackend, TunnelError> {
        let args = self.args(local, remote);
        let child = Command::new(&self.kubectl)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TunnelError::Launch(format!("{} {}: {e}", self.kubectl, args.join(" "))))?;
        debug!(pid = child.id(), local = %local, service = %remote.service, "port-forward started");
        Ok(ChildBackend { child })
    }
}

/// A child process backend.
#[derive(Debug)]
pub struct ChildBackend {
    child: Child,
}

impl Backend for ChildBackend {
    fn try_wait(&mut self) -> std::io::Result<Option<BackendExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| BackendExit { code: status.code() }))
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> std::io::Result<BackendExit> {
        let status = self.child.wait().await?;
        Ok(BackendExit {
            code: status.code(),
        })
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
