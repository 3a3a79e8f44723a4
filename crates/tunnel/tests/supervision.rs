//! Tunnel supervision under virtual time.
//!
//! Backends and probes are in-process fakes: a test "kills" the backend by
//! flipping its exit switch and then advances the paused clock.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pxelab_tunnel::{
    Backend, BackendExit, BackendLauncher, PortProbe, RemoteEndpoint, STOP_GRACE_PERIOD, Tunnel,
    TunnelConfig, TunnelError,
};

const MIN: Duration = Duration::from_millis(500);
const MAX: Duration = Duration::from_secs(8);

struct FakeBackend {
    exited: Arc<AtomicBool>,
    id: u32,
    /// How long the process keeps running after being signalled.
    linger: Duration,
}

impl Backend for FakeBackend {
    fn try_wait(&mut self) -> std::io::Result<Option<BackendExit>> {
        Ok(self
            .exited
            .load(Ordering::SeqCst)
            .then_some(BackendExit { code: Some(1) }))
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        if self.linger.is_zero() {
            self.exited.store(true, Ordering::SeqCst);
        } else {
            let exited = Arc::clone(&self.exited);
            let linger = self.linger;
            tokio::spawn(async move {
                tokio::time::sleep(linger).await;
                exited.store(true, Ordering::SeqCst);
            });
        }
        Ok(())
    }

    async fn wait(&mut self) -> std::io::Result<BackendExit> {
        while !self.exited.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(BackendExit { code: None })
    }

    fn id(&self) -> Option<u32> {
        Some(self.id)
    }
}

#[derive(Default)]
struct LauncherState {
    switches: Vec<Arc<AtomicBool>>,
    attempts: u32,
    fail_next: u32,
    linger: Duration,
}

#[derive(Clone, Default)]
struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    fn lock(&self) -> std::sync::MutexGuard<'_, LauncherState> {
        self.state.lock().unwrap()
    }

    fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Backends launched from now on outlive their kill signal by `linger`.
    fn linger_after_kill(&self, linger: Duration) {
        self.lock().linger = linger;
    }

    /// Simulates the backend dying on its own.
    fn kill_current(&self) {
        if let Some(switch) = self.lock().switches.last() {
            switch.store(true, Ordering::SeqCst);
        }
    }

    fn launches(&self) -> usize {
        self.lock().switches.len()
    }

    fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    fn live(&self) -> usize {
        self.lock()
            .switches
            .iter()
            .filter(|s| !s.load(Ordering::SeqCst))
            .count()
    }
}

impl BackendLauncher for FakeLauncher {
    type Backend = FakeBackend;

    fn launch(
        &self,
        _local: SocketAddr,
        _remote: &RemoteEndpoint,
    ) -> Result<FakeBackend, TunnelError> {
        let mut state = self.lock();
        state.attempts += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TunnelError::Launch("injected".to_owned()));
        }
        let exited = Arc::new(AtomicBool::new(false));
        state.switches.push(Arc::clone(&exited));
        Ok(FakeBackend {
            exited,
            id: state.attempts,
            linger: state.linger,
        })
    }
}

#[derive(Clone, Default)]
struct FakeProbe {
    serving: Arc<AtomicBool>,
    busy_checks: Arc<AtomicU32>,
}

impl PortProbe for FakeProbe {
    async fn is_free(&self, _addr: SocketAddr) -> bool {
        self.busy_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    async fn is_serving(&self, _addr: SocketAddr) -> bool {
        self.serving.load(Ordering::SeqCst)
    }
}

fn config() -> TunnelConfig {
    let mut config = TunnelConfig::new(RemoteEndpoint {
        kubeconfig: PathBuf::from("/tmp/kubeconfig"),
        namespace: "pxe-system".to_owned(),
        service: "pxe-server".to_owned(),
        port: 8080,
    });
    config.local_port = Some(18080);
    config.min_backoff = MIN;
    config.max_backoff = MAX;
    config.stable_threshold = Duration::from_secs(10);
    config
}

async fn open(
    config: TunnelConfig,
) -> (Tunnel<FakeLauncher, FakeProbe>, FakeLauncher, FakeProbe) {
    open_with(config, FakeLauncher::default()).await
}

async fn open_with(
    config: TunnelConfig,
    launcher: FakeLauncher,
) -> (Tunnel<FakeLauncher, FakeProbe>, FakeLauncher, FakeProbe) {
    let probe = FakeProbe::default();
    let tunnel = Tunnel::open(config, launcher.clone(), probe.clone())
        .await
        .unwrap_or_else(|e| panic!("open failed: {e}"));
    (tunnel, launcher, probe)
}

async fn advance(d: Duration) {
    tokio::time::sleep(d).await;
}

#[tokio::test(start_paused = true)]
async fn open_starts_exactly_one_backend() {
    let (mut tunnel, launcher, _probe) = open(config()).await;

    assert_eq!(tunnel.local_addr(), "127.0.0.1:18080".parse().unwrap());
    assert_eq!(tunnel.base_url(), "http://127.0.0.1:18080");
    assert_eq!(launcher.launches(), 1);
    assert_eq!(tunnel.backend_count().await, 1);
    let stats = tunnel.stats().await;
    assert_eq!(stats.restarts, 0);
    assert_eq!(stats.last_reconnect_delay, None);
    assert!(stats.backend_alive);

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn killed_backend_is_replaced_after_min_backoff() {
    // Given
    let (mut tunnel, launcher, _probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    // When: the backend dies
    launcher.kill_current();
    advance(Duration::from_secs(1)).await;

    // Then: a new backend holds the same local endpoint
    assert_eq!(launcher.launches(), 2);
    assert_eq!(launcher.live(), 1);
    assert_eq!(tunnel.backend_count().await, 1);
    assert_eq!(tunnel.local_addr().port(), 18080);
    let stats = tunnel.stats().await;
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.last_reconnect_delay, Some(MIN));

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_second_kill_waits_at_least_as_long() {
    let (mut tunnel, launcher, _probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    launcher.kill_current();
    advance(Duration::from_secs(1)).await;
    let first = tunnel.stats().await.last_reconnect_delay.unwrap();

    launcher.kill_current();
    advance(Duration::from_secs(2)).await;
    let second = tunnel.stats().await.last_reconnect_delay.unwrap();

    assert_eq!(launcher.launches(), 3);
    assert!(
        second >= first,
        "second delay {second:?} should not be shorter than first {first:?}"
    );
    assert!(second > MIN, "backoff should have grown");

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stable_run_resets_backoff_to_min() {
    let (mut tunnel, launcher, _probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    // Given: two quick deaths grow the backoff
    launcher.kill_current();
    advance(Duration::from_secs(1)).await;
    launcher.kill_current();
    advance(Duration::from_secs(2)).await;
    assert!(tunnel.stats().await.current_backoff > MIN);

    // When: the third backend runs past the stability threshold, then dies
    advance(Duration::from_secs(11)).await;
    launcher.kill_current();
    advance(Duration::from_secs(1)).await;

    // Then
    let stats = tunnel.stats().await;
    assert_eq!(stats.restarts, 3);
    assert_eq!(stats.last_reconnect_delay, Some(MIN));

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn flapping_backend_backoff_is_capped() {
    let (mut tunnel, launcher, _probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    let mut delays = Vec::new();
    for _ in 0..6 {
        launcher.kill_current();
        advance(Duration::from_secs(9)).await;
        delays.push(tunnel.stats().await.last_reconnect_delay.unwrap());
        assert!(launcher.live() <= 1, "more than one live backend");
    }

    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "delays: {delays:?}");
    assert_eq!(delays.last().copied(), Some(MAX));

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn endpoint_served_elsewhere_is_not_rebound() {
    let (mut tunnel, launcher, probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    // Given: something else already answers on the local endpoint
    probe.serving.store(true, Ordering::SeqCst);
    launcher.kill_current();
    advance(Duration::from_secs(1)).await;

    // Then: no relaunch, backoff saturated
    assert_eq!(launcher.launches(), 1);
    let stats = tunnel.stats().await;
    assert!(!stats.backend_alive);
    assert_eq!(stats.current_backoff, MAX);

    // When: the other server goes away
    probe.serving.store(false, Ordering::SeqCst);
    advance(MAX + Duration::from_secs(1)).await;

    // Then
    assert_eq!(launcher.launches(), 2);
    assert_eq!(tunnel.backend_count().await, 1);

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn busy_port_grows_backoff_before_relaunch() {
    let (mut tunnel, launcher, probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    probe.busy_checks.store(2, Ordering::SeqCst);
    launcher.kill_current();
    advance(Duration::from_secs(5)).await;

    assert_eq!(launcher.launches(), 2);
    assert_eq!(
        tunnel.stats().await.last_reconnect_delay,
        Some(Duration::from_secs(2))
    );

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_restarts_are_retried() {
    let (mut tunnel, launcher, _probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    launcher.fail_next(2);
    launcher.kill_current();
    advance(Duration::from_secs(5)).await;

    assert_eq!(launcher.attempts(), 4);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(tunnel.stats().await.restarts, 1);
    assert_eq!(tunnel.backend_count().await, 1);

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_prevents_restart() {
    let (mut tunnel, launcher, _probe) = open(config()).await;
    advance(Duration::from_millis(100)).await;

    // Given: the supervisor noticed the exit and is waiting out the backoff
    launcher.kill_current();
    advance(Duration::from_millis(300)).await;

    // When
    tunnel.stop().await;
    advance(Duration::from_secs(5)).await;

    // Then
    assert_eq!(launcher.launches(), 1);
    assert_eq!(tunnel.backend_count().await, 0);
    assert!(tunnel.is_stopped());

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_kills_running_backend() {
    let (mut tunnel, launcher, _probe) = open(config()).await;

    tunnel.stop().await;

    assert_eq!(launcher.live(), 0);
    assert_eq!(tunnel.backend_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn stop_returns_only_after_backend_has_exited() {
    // Given: the backend takes two seconds to exit after the kill signal
    let launcher = FakeLauncher::default();
    launcher.linger_after_kill(Duration::from_secs(2));
    let (mut tunnel, launcher, _probe) = open_with(config(), launcher).await;
    let started = tokio::time::Instant::now();

    // When
    tunnel.stop().await;

    // Then: the local endpoint is no longer held by a live backend
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(launcher.live(), 0, "backend still running after stop");
    assert_eq!(tunnel.backend_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn stop_gives_up_on_backend_that_ignores_kill() {
    let launcher = FakeLauncher::default();
    launcher.linger_after_kill(Duration::from_secs(3600));
    let (mut tunnel, launcher, _probe) = open_with(config(), launcher).await;
    let started = tokio::time::Instant::now();

    tunnel.stop().await;

    let elapsed = started.elapsed();
    assert!(elapsed >= STOP_GRACE_PERIOD, "elapsed {elapsed:?}");
    assert!(elapsed < STOP_GRACE_PERIOD + Duration::from_secs(1), "elapsed {elapsed:?}");
    assert!(tunnel.is_stopped());
    assert_eq!(launcher.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsupervised_tunnel_does_not_restart() {
    let mut config = config();
    config.supervise = false;
    let (mut tunnel, launcher, _probe) = open(config).await;

    launcher.kill_current();
    advance(Duration::from_secs(5)).await;

    assert_eq!(launcher.launches(), 1);
    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn wait_ready_succeeds_once_served() {
    let (mut tunnel, _launcher, probe) = open(config()).await;
    probe.serving.store(true, Ordering::SeqCst);

    tunnel.wait_ready(Duration::from_secs(5)).await.unwrap();

    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn wait_ready_times_out() {
    let (mut tunnel, _launcher, _probe) = open(config()).await;

    let err = tunnel.wait_ready(Duration::from_secs(3)).await.unwrap_err();

    assert!(matches!(err, TunnelError::NotReady { secs: 3, .. }), "got: {err}");
    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn open_fails_when_first_launch_fails() {
    let launcher = FakeLauncher::default();
    launcher.fail_next(1);

    let result = Tunnel::open(config(), launcher.clone(), FakeProbe::default()).await;

    assert!(matches!(result, Err(TunnelError::Launch(_))));
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn open_rejects_invalid_config() {
    let mut config = config();
    config.min_backoff = Duration::from_secs(60);

    let result = Tunnel::open(config, FakeLauncher::default(), FakeProbe::default()).await;

    assert!(matches!(result, Err(TunnelError::InvalidConfig(_))));
}
