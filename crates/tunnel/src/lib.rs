//! pxelab-tunnel: a port-forward that survives its backend dying.
//!
//! [`Tunnel`] keeps a fixed local address pointed at a service inside an
//! environment's cluster. A supervisor task restarts the backing process
//! (normally `kubectl port-forward`) with exponential backoff whenever it
//! exits, until [`Tunnel::stop`] is called.
//!
//! # Modules
//! - [`backend`]: backend process traits and the kubectl implementation
//! - [`backoff`]: reconnect delay state
//! - [`config`]: tunnel settings and remote endpoint
//! - [`probe`]: local endpoint probes
//! - [`tunnel`]: the tunnel and its supervisor

pub mod backend;
pub mod backoff;
pub mod config;
pub mod error;
pub mod probe;
pub mod tunnel;

pub use backend::{Backend, BackendExit, BackendLauncher, ChildBackend, KubectlPortForward};
pub use backoff::Backoff;
pub use config::{RemoteEndpoint, TunnelConfig};
pub use error::TunnelError;
pub use probe::{HttpPortProbe, PortProbe};
pub use tunnel::{STOP_GRACE_PERIOD, Tunnel, TunnelStats};

/// The production tunnel: kubectl port-forward probed over HTTP.
pub type KubectlTunnel = Tunnel<KubectlPortForward, HttpPortProbe>;
