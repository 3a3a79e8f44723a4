//! Tunnel errors.
//!
//! Only [`Tunnel::open`](crate::Tunnel::open) and
//! [`Tunnel::wait_ready`](crate::Tunnel::wait_ready) surface these to callers.
//! Failures inside the supervisor are logged and retried.

use std::net::SocketAddr;

use pxelab_core::error::PxelabError;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("invalid tunnel config: {0}")]
    InvalidConfig(String),

    #[error("failed to bind local endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to launch tunnel backend: {0}")]
    Launch(String),

    #[error("tunnel at {addr} not ready after {secs}s")]
    NotReady { addr: SocketAddr, secs: u64 },

    #[error("tunnel stopped")]
    Stopped,

    #[error("probe setup failed: {0}")]
    Probe(String),
}

impl From<TunnelError> for PxelabError {
    fn from(err: TunnelError) -> Self {
        PxelabError::Tunnel(err.to_string())
    }
}
