//! Supervised tunnel.
//!
//! ```text
//!  caller ──► Tunnel::open ──► launch backend ──► spawn supervisor (if supervise)
//!
//!  supervisor loop:
//!    wait for backend exit ─► stable run? reset backoff
//!      └─► sleep(delay) ─► endpoint already served?  saturate, retry
//!                        ─► [lock] port busy?          grow, retry
//!                        ─► [lock] launch              replace handle, loop
//! ```
//!
//! The backend handle and the backoff live in one `State` behind a single
//! async mutex. `stop()` takes the same lock to kill the backend, so a restart
//! in progress either finishes before the kill or observes the cancellation
//! and never launches.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use pxelab_core::metrics as m;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendLauncher};
use crate::backoff::Backoff;
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::probe::PortProbe;

/// How often the supervisor checks whether the backend is still running.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How often [`Tunnel::wait_ready`] probes the local endpoint.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long [`Tunnel::stop`] waits for a killed backend to exit.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Point-in-time view of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStats {
    /// Successful backend restarts since open.
    pub restarts: u64,
    /// Delay waited before the most recent restart.
    pub last_reconnect_delay: Option<Duration>,
    /// Delay the next unstable restart would wait.
    pub current_backoff: Duration,
    pub backend_alive: bool,
}

struct State<B> {
    backend: Option<B>,
    started_at: Instant,
    backoff: Backoff,
    restarts: u64,
    last_delay: Option<Duration>,
}

impl<B: Backend> State<B> {
    fn install(&mut self, backend: B) {
        self.backend = Some(backend);
        self.started_at = Instant::now();
        gauge!(m::TUNNEL_BACKENDS_ACTIVE).increment(1.0);
    }

    /// Drops the handle of a backend that has already exited.
    fn release(&mut self) {
        if self.backend.take().is_some() {
            gauge!(m::TUNNEL_BACKENDS_ACTIVE).decrement(1.0);
        }
    }

    /// Signals the backend and hands it back for reaping.
    fn kill(&mut self) -> Option<B> {
        let mut backend = self.backend.take()?;
        if let Err(e) = backend.start_kill() {
            warn!(pid = backend.id(), error = %e, "failed to kill tunnel backend");
        }
        gauge!(m::TUNNEL_BACKENDS_ACTIVE).decrement(1.0);
        Some(backend)
    }

    /// Kills the backend and waits up to `grace` for it to exit, so the
    /// local endpoint is free when this returns.
    async fn kill_and_wait(&mut self, grace: Duration) {
        let Some(mut backend) = self.kill() else {
            return;
        };
        let pid = backend.id();
        match tokio::time::timeout(grace, backend.wait()).await {
            Ok(Ok(exit)) => debug!(pid, code = exit.code, "tunnel backend exited"),
            Ok(Err(e)) => warn!(pid, error = %e, "failed to wait for tunnel backend"),
            Err(_) => warn!(
                pid,
                grace_ms = grace.as_millis() as u64,
                "tunnel backend still running after kill"
            ),
        }
    }
}

struct Shared<L: BackendLauncher, P> {
    launcher: L,
    probe: P,
    config: TunnelConfig,
    local: SocketAddr,
    state: Mutex<State<L::Backend>>,
}

/// A forwarding channel from a fixed local address to a remote service.
pub struct Tunnel<L: BackendLauncher, P: PortProbe> {
    shared: Arc<Shared<L, P>>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
    stopped: bool,
}

impl<L: BackendLauncher, P: PortProbe> Tunnel<L, P> {
    /// Starts the first backend and, if configured, the supervisor.
    ///
    /// Returns as soon as the backend process is running. Use
    /// [`wait_ready`](Self::wait_ready) to wait until the service answers.
    pub async fn open(config: TunnelConfig, launcher: L, probe: P) -> Result<Self, TunnelError> {
        config.validate()?;

        let local = match config.local_port {
            Some(port) => SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            None => ephemeral_addr().await?,
        };

        let backend = launcher.launch(local, &config.remote)?;
        let mut state = State {
            backend: None,
            started_at: Instant::now(),
            backoff: Backoff::new(config.min_backoff, config.max_backoff),
            restarts: 0,
            last_delay: None,
        };
        state.install(backend);

        info!(
            local = %local,
            namespace = %config.remote.namespace,
            service = %config.remote.service,
            port = config.remote.port,
            supervise = config.supervise,
            "tunnel opened"
        );

        let supervise = config.supervise;
        let shared = Arc::new(Shared {
            launcher,
            probe,
            config,
            local,
            state: Mutex::new(state),
        });
        let cancel = CancellationToken::new();
        let supervisor =
            supervise.then(|| tokio::spawn(supervise_loop(Arc::clone(&shared), cancel.clone())));

        Ok(Self {
            shared,
            cancel,
            supervisor,
            stopped: false,
        })
    }

    /// Local address; fixed for the tunnel's lifetime.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.shared.local)
    }

    /// Polls the local endpoint until the remote service answers.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), TunnelError> {
        let local = self.shared.local;
        let poll = async {
            loop {
                if self.cancel.is_cancelled() {
                    return Err(TunnelError::Stopped);
                }
                if self.shared.probe.is_serving(local).await {
                    return Ok(());
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => {
                if result.is_ok() {
                    debug!(local = %local, "tunnel ready");
                }
                result
            }
            Err(_) => Err(TunnelError::NotReady {
                addr: local,
                secs: timeout.as_secs(),
            }),
        }
    }

    pub async fn stats(&self) -> TunnelStats {
        let state = self.shared.state.lock().await;
        TunnelStats {
            restarts: state.restarts,
            last_reconnect_delay: state.last_delay,
            current_backoff: state.backoff.current(),
            backend_alive: state.backend.is_some(),
        }
    }

    /// Number of backends currently held: 0 or 1.
    pub async fn backend_count(&self) -> usize {
        usize::from(self.shared.state.lock().await.backend.is_some())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Cancels the supervisor, kills the backend and waits for both to
    /// finish. The backend gets [`STOP_GRACE_PERIOD`] to exit. Calling it
    /// again is a no-op.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.cancel.cancel();

        self.shared
            .state
            .lock()
            .await
            .kill_and_wait(STOP_GRACE_PERIOD)
            .await;

        if let Some(handle) = self.supervisor.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "tunnel supervisor ended abnormally");
        }
        info!(local = %self.shared.local, "tunnel stopped");
    }
}

impl<L: BackendLauncher, P: PortProbe> Drop for Tunnel<L, P> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        self.cancel.cancel();
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
        match self.shared.state.try_lock() {
            Ok(mut state) => {
                state.kill();
            }
            Err(_) => warn!(local = %self.shared.local, "tunnel dropped while busy, backend may linger"),
        }
    }
}

/// Picks a free loopback port by binding port 0.
async fn ephemeral_addr() -> Result<SocketAddr, TunnelError> {
    let wildcard = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let listener = TcpListener::bind(wildcard)
        .await
        .map_err(|source| TunnelError::Bind {
            addr: wildcard,
            source,
        })?;
    listener
        .local_addr()
        .map_err(|source| TunnelError::Bind {
            addr: wildcard,
            source,
        })
}

async fn supervise_loop<L: BackendLauncher, P: PortProbe>(
    shared: Arc<Shared<L, P>>,
    cancel: CancellationToken,
) {
    let local = shared.local;
    debug!(local = %local, "tunnel supervisor started");

    loop {
        let ran_for = tokio::select! {
            _ = cancel.cancelled() => break,
            ran_for = wait_for_exit(&shared) => ran_for,
        };
        if cancel.is_cancelled() {
            break;
        }

        let mut delay = {
            let mut state = shared.state.lock().await;
            if ran_for >= shared.config.stable_threshold {
                state.backoff.reset()
            } else {
                state.backoff.current()
            }
        };
        info!(
            local = %local,
            ran_ms = ran_for.as_millis() as u64,
            delay_ms = delay.as_millis() as u64,
            "tunnel backend exited, reconnecting"
        );

        loop {
            gauge!(m::TUNNEL_BACKOFF_SECONDS).set(delay.as_secs_f64());
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(local = %local, "tunnel supervisor cancelled during backoff");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if shared.probe.is_serving(local).await {
                delay = shared.state.lock().await.backoff.saturate();
                warn!(
                    local = %local,
                    delay_ms = delay.as_millis() as u64,
                    "local endpoint already served by another process, not rebinding"
                );
                continue;
            }

            let mut state = shared.state.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            if !shared.probe.is_free(local).await {
                delay = state.backoff.grow();
                debug!(local = %local, delay_ms = delay.as_millis() as u64, "local endpoint busy");
                continue;
            }

            match shared.launcher.launch(local, &shared.config.remote) {
                Ok(backend) => {
                    let pid = backend.id();
                    state.install(backend);
                    state.restarts += 1;
                    state.last_delay = Some(delay);
                    state.backoff.grow();
                    counter!(m::TUNNEL_RESTARTS_TOTAL).increment(1);
                    info!(local = %local, pid, restarts = state.restarts, "tunnel backend restarted");
                    break;
                }
                Err(e) => {
                    delay = state.backoff.grow();
                    warn!(
                        local = %local,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "tunnel backend restart failed"
                    );
                }
            }
        }
    }

    debug!(local = %local, "tunnel supervisor finished");
}

/// Waits until the current backend exits and returns how long it ran.
async fn wait_for_exit<L: BackendLauncher, P: PortProbe>(shared: &Shared<L, P>) -> Duration {
    loop {
        {
            let mut state = shared.state.lock().await;
            let exited = match state.backend.as_mut() {
                None => true,
                Some(backend) => match backend.try_wait() {
                    Ok(Some(exit)) => {
                        debug!(code = exit.code, "tunnel backend exited");
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warn!(error = %e, "cannot query tunnel backend, treating as exited");
                        true
                    }
                },
            };
            if exited {
                state.release();
                return state.started_at.elapsed();
            }
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
