//! Lifecycle coordination for the hosted broker engine.
//!
//! A single coordinator task owns the engine, the configuration and the
//! restart state; notifiers (signal handlers, file watchers, network-change
//! callbacks) talk to it over a bounded control channel through a cloneable
//! [`ShellHandle`]. Requests are idempotent and commutative: concurrent
//! restart requests collapse into one pending restart with the longest
//! remaining cooldown, and a shutdown request always wins over a pending
//! restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{BrokerConfig, ParseResult};
use crate::engine::ServiceEngine;
use crate::error::BrokerResult;
use crate::log::LogSink;
use crate::source::ConfigSource;

/// Interval between poll-loop wakeups. Bounds worst-case shutdown latency
/// independently of any restart cooldown.
pub const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Cooldown applied to restarts triggered by network interface changes, in
/// case we get blasted with a burst of notifications at once.
pub const NETWORK_CHANGE_COOLDOWN: Duration = Duration::from_secs(5);

const CONTROL_QUEUE_DEPTH: usize = 32;

/// Lifecycle states of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Stopped,
    Starting,
    Running,
    RestartPending,
    Stopping,
    ShuttingDown,
}

#[derive(Debug)]
enum ControlRequest {
    Restart { cooldown: Duration },
    ScopeChange { scope: String },
    Shutdown,
}

/// Thread-safe entry points for asynchronous notifiers.
///
/// Every method is non-blocking: requests go over a bounded channel with
/// `try_send`, and a full queue means an equivalent request is already
/// waiting, so dropping the new one loses nothing.
#[derive(Clone)]
pub struct ShellHandle {
    tx: mpsc::Sender<ControlRequest>,
    shutdown: Arc<AtomicBool>,
}

impl ShellHandle {
    /// Request a broker restart no earlier than `cooldown` from now.
    pub fn request_restart(&self, cooldown: Duration) {
        self.send(ControlRequest::Restart { cooldown });
    }

    /// A network interface appeared or disappeared; restart after the
    /// network-change cooldown.
    pub fn notify_network_change(&self) {
        tracing::info!("A network change was detected - requesting broker restart.");
        self.send(ControlRequest::Restart {
            cooldown: NETWORK_CHANGE_COOLDOWN,
        });
    }

    /// The configuration document changed on disk; restart promptly.
    pub fn notify_config_change(&self) {
        self.send(ControlRequest::Restart {
            cooldown: Duration::ZERO,
        });
    }

    /// The discovery layer pushed a new scope; stage it and restart. The
    /// staged scope overrides whatever the configuration file contains when
    /// the restart cycle reloads it.
    pub fn notify_scope_change(&self, scope: String) {
        self.send(ControlRequest::ScopeChange { scope });
    }

    /// Request a graceful shutdown. Always honored ahead of any pending
    /// restart. The request is latched in a flag the poll loop checks every
    /// tick, so a saturated queue cannot drop it; the message only serves to
    /// wake the loop early.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.send(ControlRequest::Shutdown);
    }

    fn send(&self, request: ControlRequest) {
        if let Err(err) = self.tx.try_send(request) {
            tracing::warn!("Dropping lifecycle request: {err}");
        }
    }
}

/// Pending-restart bookkeeping, owned by the coordinator task.
#[derive(Debug, Default)]
struct RestartState {
    pending: bool,
    deadline: Option<Instant>,
    staged_scope: Option<String>,
}

impl RestartState {
    /// Arm or extend the cooldown timer. Extension-only: a request with a
    /// shorter cooldown never shortens an already-armed timer, so bursts of
    /// change notifications cannot collapse into a tight restart loop.
    fn arm(&mut self, cooldown: Duration) {
        let due = Instant::now() + cooldown;
        self.pending = true;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing > due => existing,
            _ => due,
        });
    }

    fn due(&self, now: Instant) -> bool {
        self.pending && self.deadline.map_or(true, |deadline| deadline <= now)
    }

    /// Consume the pending restart, returning any staged scope. Called
    /// exactly once per restart cycle.
    fn take_staged_scope(&mut self) -> Option<String> {
        self.pending = false;
        self.deadline = None;
        self.staged_scope.take()
    }
}

/// Platform-neutral shell around the broker engine: loads and reloads the
/// configuration, drives the engine's lifecycle and sequences restart and
/// shutdown requests.
pub struct BrokerShell {
    engine: Box<dyn ServiceEngine>,
    source: Box<dyn ConfigSource>,
    log: Arc<dyn LogSink>,
    config: BrokerConfig,
    state: ShellState,
    restart: RestartState,
    engine_running: bool,
    poll_interval: Duration,
    shutdown_flag: Arc<AtomicBool>,
    control_rx: mpsc::Receiver<ControlRequest>,
    handle: ShellHandle,
}

impl BrokerShell {
    pub fn new(
        engine: Box<dyn ServiceEngine>,
        source: Box<dyn ConfigSource>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let (tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        Self {
            engine,
            source,
            log,
            config: BrokerConfig::new(),
            state: ShellState::Stopped,
            restart: RestartState::default(),
            engine_running: false,
            poll_interval: POLL_INTERVAL,
            shutdown_flag: shutdown_flag.clone(),
            control_rx,
            handle: ShellHandle {
                tx,
                shutdown: shutdown_flag,
            },
        }
    }

    /// Override the poll interval. Mostly useful in tests.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// A cloneable handle for notifiers. May be taken before `run`.
    pub fn handle(&self) -> ShellHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Run the coordinator until a shutdown request arrives.
    ///
    /// Startup failures of the hosted engine are not fatal: the loop keeps
    /// polling and the engine is retried on the next restart cycle.
    pub async fn run(mut self) -> BrokerResult<()> {
        self.state = ShellState::Starting;
        self.reload_settings();
        self.start_engine().await;
        self.state = ShellState::Running;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.control_rx.recv() => {
                    if let Some(request) = request {
                        self.handle_request(request);
                    }
                }
                _ = ticker.tick() => {
                    // Shutdown always wins over a pending restart.
                    if self.shutdown_requested() {
                        break;
                    }
                    if self.engine_running {
                        self.engine.tick().await;
                    }
                    if self.restart.due(Instant::now()) {
                        self.restart_cycle().await;
                    }
                }
            }

            if self.shutdown_requested() {
                break;
            }
        }
        self.state = ShellState::ShuttingDown;

        if self.engine_running {
            self.engine.stop().await;
            self.engine_running = false;
        }
        self.log.info("Broker shut down.");
        self.state = ShellState::Stopped;
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.state == ShellState::ShuttingDown || self.shutdown_flag.load(Ordering::SeqCst)
    }

    fn handle_request(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Restart { cooldown } => {
                if self.shutdown_requested() {
                    return;
                }
                self.restart.arm(cooldown);
                if self.state == ShellState::Running {
                    self.log
                        .info("Restart requested, applying changes after cooldown.");
                    self.state = ShellState::RestartPending;
                }
            }
            ControlRequest::ScopeChange { scope } => {
                if self.shutdown_requested() {
                    return;
                }
                self.log
                    .info("Scope change detected, restarting broker and applying changes.");
                self.restart.staged_scope = Some(scope);
                self.restart.arm(Duration::ZERO);
                if self.state == ShellState::Running {
                    self.state = ShellState::RestartPending;
                }
            }
            ControlRequest::Shutdown => {
                self.log.info("Shutdown requested, broker shutting down...");
                self.state = ShellState::ShuttingDown;
            }
        }
    }

    /// Re-acquire the configuration source and re-run validation. Never
    /// fails: an unreadable source substitutes defaults and a malformed
    /// document keeps the previous settings.
    fn reload_settings(&mut self) {
        self.log.info(&format!(
            "Reading configuration at \"{}\"...",
            self.source.location()
        ));
        match self.config.load(self.source.as_ref(), self.log.as_ref()) {
            ParseResult::Ok => {}
            ParseResult::InvalidSetting => self.log.notice(
                "One or more configuration values were invalid; defaults are in effect for those settings.",
            ),
            ParseResult::JsonParseErr => self
                .log
                .error("Error parsing configuration file. Continuing with previous settings..."),
            // load() already logged the specifics.
            ParseResult::FileOpenErr => {}
        }
        self.log.set_level(self.config.settings.log_level);
    }

    async fn start_engine(&mut self) {
        if !self.config.settings.enable_broker {
            self.log
                .notice("The broker is disabled by configuration; not starting the engine.");
            self.engine_running = false;
            return;
        }
        match self.engine.start(self.config.settings.clone()).await {
            Ok(()) => {
                self.engine_running = true;
                self.log.info(&format!(
                    "Broker started on scope \"{}\".",
                    self.config.settings.scope
                ));
            }
            Err(err) => {
                // Not fatal to the daemon: stay up and retry on the next
                // restart cycle, e.g. once a network interface reappears.
                self.engine_running = false;
                self.log.error(&format!(
                    "{err}. The broker will remain disabled until the next restart."
                ));
            }
        }
    }

    async fn restart_cycle(&mut self) {
        self.state = ShellState::Stopping;
        self.log
            .info("Restarting broker and applying configuration changes...");

        let previous_scope = if self.engine_running {
            self.engine.current_settings().scope
        } else {
            self.config.settings.scope.clone()
        };

        if self.engine_running {
            self.engine.stop().await;
            self.engine_running = false;
        }

        let staged_scope = self.restart.take_staged_scope();
        self.reload_settings();
        if let Some(scope) = staged_scope {
            // A scope pushed at runtime wins over the reloaded file.
            self.config.settings.scope = scope;
        }
        if previous_scope != self.config.settings.scope {
            self.log.info(&format!(
                "Scope changed from \"{}\" to \"{}\".",
                previous_scope, self.config.settings.scope
            ));
        }

        self.start_engine().await;
        self.state = ShellState::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use crate::log::MemoryLogSink;
    use crate::settings::BrokerSettings;
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct EngineProbe {
        starts: Vec<BrokerSettings>,
        stops: usize,
        ticks: usize,
        fail_next_start: bool,
    }

    #[derive(Clone, Default)]
    struct MockEngine {
        probe: Arc<Mutex<EngineProbe>>,
    }

    #[async_trait]
    impl ServiceEngine for MockEngine {
        async fn start(&mut self, settings: BrokerSettings) -> BrokerResult<()> {
            let mut probe = self.probe.lock().unwrap();
            if probe.fail_next_start {
                probe.fail_next_start = false;
                return Err(BrokerError::EngineStart {
                    reason: "injected failure".to_string(),
                });
            }
            probe.starts.push(settings);
            Ok(())
        }

        async fn stop(&mut self) {
            self.probe.lock().unwrap().stops += 1;
        }

        async fn tick(&mut self) {
            self.probe.lock().unwrap().ticks += 1;
        }

        fn current_settings(&self) -> BrokerSettings {
            let probe = self.probe.lock().unwrap();
            probe.starts.last().cloned().unwrap_or_default()
        }
    }

    #[derive(Clone)]
    struct MemorySource {
        document: Arc<Mutex<Option<String>>>,
    }

    impl MemorySource {
        fn new(document: Option<&str>) -> Self {
            Self {
                document: Arc::new(Mutex::new(document.map(str::to_string))),
            }
        }

        fn set(&self, document: &str) {
            *self.document.lock().unwrap() = Some(document.to_string());
        }
    }

    impl ConfigSource for MemorySource {
        fn location(&self) -> String {
            "<memory>".to_string()
        }

        fn read_document(&self) -> io::Result<String> {
            self.document
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no document"))
        }
    }

    struct Fixture {
        probe: Arc<Mutex<EngineProbe>>,
        source: MemorySource,
        handle: ShellHandle,
        task: JoinHandle<BrokerResult<()>>,
    }

    fn spawn_shell(document: Option<&str>) -> Fixture {
        spawn_shell_with(document, false)
    }

    fn spawn_shell_with(document: Option<&str>, fail_first_start: bool) -> Fixture {
        let engine = MockEngine::default();
        engine.probe.lock().unwrap().fail_next_start = fail_first_start;
        let probe = engine.probe.clone();
        let source = MemorySource::new(document);

        let shell = BrokerShell::new(
            Box::new(engine),
            Box::new(source.clone()),
            Arc::new(MemoryLogSink::new()),
        );
        let handle = shell.handle();
        let task = tokio::spawn(shell.run());

        Fixture {
            probe,
            source,
            handle,
            task,
        }
    }

    fn start_count(probe: &Arc<Mutex<EngineProbe>>) -> usize {
        probe.lock().unwrap().starts.len()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn starts_engine_with_validated_settings() {
        let fixture = spawn_shell(Some(r#"{ "scope": "studio", "max_connections": 7 }"#));
        settle().await;

        {
            let probe = fixture.probe.lock().unwrap();
            assert_eq!(probe.starts.len(), 1);
            assert_eq!(probe.starts[0].scope, "studio");
            assert_eq!(probe.starts[0].max_connections, 7);
        }

        fixture.handle.shutdown();
        fixture
            .task
            .await
            .expect("coordinator task must not panic")
            .expect("run must return cleanly");
        assert_eq!(fixture.probe.lock().unwrap().stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_config_source_starts_with_defaults() {
        let fixture = spawn_shell(None);
        settle().await;

        {
            let probe = fixture.probe.lock().unwrap();
            assert_eq!(probe.starts.len(), 1);
            assert_eq!(probe.starts[0].scope, "default");
            assert_eq!(probe.starts[0].max_reject_connections, 1000);
        }

        fixture.handle.shutdown();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn engine_is_ticked_while_running() {
        let fixture = spawn_shell(Some("{}"));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(fixture.probe.lock().unwrap().ticks >= 2);

        fixture.handle.shutdown();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_cooldown_never_shortens_an_armed_timer() {
        let fixture = spawn_shell(Some("{}"));
        settle().await;
        assert_eq!(start_count(&fixture.probe), 1);

        fixture.handle.request_restart(Duration::from_millis(5000));
        fixture.handle.request_restart(Duration::from_millis(1000));

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(
            start_count(&fixture.probe),
            1,
            "restart must not fire before the longest requested cooldown"
        );

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(start_count(&fixture.probe), 2);

        fixture.handle.shutdown();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_collapses_to_one_restart() {
        let fixture = spawn_shell(Some("{}"));
        settle().await;

        for _ in 0..10 {
            fixture.handle.request_restart(Duration::from_millis(500));
        }

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(start_count(&fixture.probe), 2, "one initial start plus one restart");

        fixture.handle.shutdown();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_preempts_pending_restart() {
        let fixture = spawn_shell(Some("{}"));
        settle().await;

        fixture.handle.request_restart(Duration::from_millis(1000));
        fixture.handle.shutdown();

        let result = fixture.task.await.expect("coordinator task must not panic");
        assert!(result.is_ok());

        let probe = fixture.probe.lock().unwrap();
        assert_eq!(
            probe.starts.len(),
            1,
            "no further engine start once shutdown was requested"
        );
        assert_eq!(probe.stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_reloads_the_configuration_source() {
        let fixture = spawn_shell(Some("{}"));
        settle().await;

        fixture.source.set(r#"{ "max_connections": 77 }"#);
        fixture.handle.notify_config_change();

        tokio::time::sleep(Duration::from_millis(700)).await;
        {
            let probe = fixture.probe.lock().unwrap();
            assert_eq!(probe.starts.len(), 2);
            assert_eq!(probe.starts[0].max_connections, 0);
            assert_eq!(probe.starts[1].max_connections, 77);
        }

        fixture.handle.shutdown();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn staged_scope_overrides_reloaded_file() {
        let fixture = spawn_shell(Some(r#"{ "scope": "file-scope" }"#));
        settle().await;

        fixture
            .handle
            .notify_scope_change("pushed-scope".to_string());

        tokio::time::sleep(Duration::from_millis(700)).await;
        {
            let probe = fixture.probe.lock().unwrap();
            assert_eq!(probe.starts.len(), 2);
            assert_eq!(probe.starts[0].scope, "file-scope");
            assert_eq!(probe.starts[1].scope, "pushed-scope");
        }

        fixture.handle.shutdown();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn engine_start_failure_is_retried_on_next_restart() {
        let fixture = spawn_shell_with(Some("{}"), true);
        settle().await;
        assert_eq!(start_count(&fixture.probe), 0, "first start was injected to fail");

        // The coordinator must still be polling and able to recover.
        fixture.handle.request_restart(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(start_count(&fixture.probe), 1);

        fixture.handle.shutdown();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_broker_never_starts_the_engine() {
        let fixture = spawn_shell(Some(r#"{ "enable_broker": false }"#));
        settle().await;
        assert_eq!(start_count(&fixture.probe), 0);

        fixture.handle.shutdown();
        let result = fixture.task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(fixture.probe.lock().unwrap().stops, 0);
    }

    #[tokio::test]
    async fn control_queue_overflow_never_blocks() {
        let engine = MockEngine::default();
        let shell = BrokerShell::new(
            Box::new(engine),
            Box::new(MemorySource::new(Some("{}"))),
            Arc::new(MemoryLogSink::new()),
        );
        let handle = shell.handle();

        // The coordinator is not draining the queue; every send must still
        // return immediately.
        for _ in 0..100 {
            handle.request_restart(Duration::ZERO);
        }
        handle.shutdown();
    }
}
