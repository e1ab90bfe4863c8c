//! The sync controller: debounced flushes, periodic pulls, and
//! environment triggers over a set of sync domains.

use crate::config::SyncConfig;
use crate::events::{LocalWriteBus, Subscription, WriteEvent};
use crate::service::{DomainOutcome, DomainSync};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Not running; no timers, no subscriptions.
    Stopped,
    /// Scheduler thread active.
    Running,
}

/// Environment changes that force an immediate pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity came back.
    Reconnect,
    /// The application returned to the foreground.
    Foreground,
}

/// Counters accumulated across sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed flush cycles.
    pub flushes: u64,
    /// Completed pull sweeps (startup, timer, or trigger).
    pub pulls: u64,
    /// Keys pushed across all domains.
    pub keys_pushed: u64,
    /// Keys applied locally from remote state.
    pub keys_pulled: u64,
    /// Compare-and-swap conflicts encountered.
    pub conflicts: u64,
    /// Per-key or per-domain failures (all retried on later cycles).
    pub failures: u64,
    /// Message of the most recent failure, if any.
    pub last_error: Option<String>,
}

impl SyncStats {
    fn absorb(&mut self, outcome: DomainOutcome) {
        self.keys_pushed += outcome.pushed;
        self.keys_pulled += outcome.pulled;
        self.conflicts += outcome.conflicts;
        self.failures += outcome.failures;
        if outcome.error.is_some() {
            self.last_error = outcome.error;
        }
    }
}

enum ControlMsg {
    Write(WriteEvent),
    PullNow,
    Flush,
    Shutdown,
}

struct Runtime {
    tx: Sender<ControlMsg>,
    handle: JoinHandle<()>,
    _subscription: Subscription,
}

/// The scheduler tying local-write events, debounce, polling, and
/// environment triggers to the domains' push and pull.
///
/// Explicitly constructed with injected collaborators; there is no
/// ambient global state. Sync failures never propagate to callers:
/// every per-domain error is caught, logged, and retried on a later
/// cycle, so synchronization can never block the foreground
/// application.
pub struct SyncController {
    config: SyncConfig,
    bus: Arc<LocalWriteBus>,
    domains: Vec<Arc<dyn DomainSync>>,
    pending: Arc<Mutex<HashSet<String>>>,
    stats: Arc<RwLock<SyncStats>>,
    runtime: Mutex<Option<Runtime>>,
}

impl SyncController {
    /// Creates a stopped controller.
    ///
    /// `domains` are pushed in order on each flush; put the primary
    /// domain first.
    pub fn new(
        config: SyncConfig,
        bus: Arc<LocalWriteBus>,
        domains: Vec<Arc<dyn DomainSync>>,
    ) -> Self {
        Self {
            config,
            bus,
            domains,
            pending: Arc::new(Mutex::new(HashSet::new())),
            stats: Arc::new(RwLock::new(SyncStats::default())),
            runtime: Mutex::new(None),
        }
    }

    /// Starts the controller: subscribes to the write bus, performs an
    /// immediate pull, and begins the poll loop. Idempotent; a no-op
    /// when sync is disabled.
    pub fn start(&self) {
        if !self.config.enabled {
            debug!("sync disabled; controller not starting");
            return;
        }
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel();
        let event_tx = tx.clone();
        let subscription = self.bus.subscribe(move |event| {
            let _ = event_tx.send(ControlMsg::Write(event.clone()));
        });

        let scheduler = Scheduler {
            rx,
            domains: self.domains.clone(),
            pending: Arc::clone(&self.pending),
            stats: Arc::clone(&self.stats),
            config: self.config.clone(),
        };
        let handle = match thread::Builder::new()
            .name("folio-sync".into())
            .spawn(move || scheduler.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("failed to spawn sync scheduler: {e}");
                return;
            }
        };

        *runtime = Some(Runtime {
            tx,
            handle,
            _subscription: subscription,
        });
    }

    /// Stops the controller: unsubscribes, clears timers, and joins
    /// the scheduler thread. Idempotent.
    pub fn stop(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        let _ = runtime.tx.send(ControlMsg::Shutdown);
        let _ = runtime.handle.join();
        // The bus subscription detaches as `runtime` drops.
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ControllerState {
        if self.runtime.lock().is_some() {
            ControllerState::Running
        } else {
            ControllerState::Stopped
        }
    }

    /// Requests a flush ahead of the debounce deadline.
    pub fn flush_now(&self) {
        self.send(ControlMsg::Flush);
    }

    /// Requests an immediate pull of every domain.
    pub fn pull_now(&self) {
        self.send(ControlMsg::PullNow);
    }

    /// Reports an environment change; both triggers force an
    /// immediate pull.
    pub fn trigger(&self, trigger: SyncTrigger) {
        debug!(?trigger, "environment trigger");
        self.send(ControlMsg::PullNow);
    }

    /// A snapshot of the accumulated counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn send(&self, msg: ControlMsg) {
        if let Some(runtime) = &*self.runtime.lock() {
            let _ = runtime.tx.send(msg);
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Scheduler {
    rx: Receiver<ControlMsg>,
    domains: Vec<Arc<dyn DomainSync>>,
    pending: Arc<Mutex<HashSet<String>>>,
    stats: Arc<RwLock<SyncStats>>,
    config: SyncConfig,
}

impl Scheduler {
    fn run(self) {
        let debounce = self.config.effective_debounce();
        let poll_interval = self.config.effective_poll_interval();

        // Immediate pull on start.
        self.pull_all();
        let mut next_poll = Instant::now() + poll_interval;
        let mut debounce_deadline: Option<Instant> = None;

        loop {
            let now = Instant::now();
            if let Some(deadline) = debounce_deadline {
                if now >= deadline {
                    debounce_deadline = None;
                    self.flush();
                    continue;
                }
            }
            if now >= next_poll {
                next_poll = now + poll_interval;
                self.pull_all();
                continue;
            }

            let mut wait = next_poll - now;
            if let Some(deadline) = debounce_deadline {
                wait = wait.min(deadline - now);
            }

            match self.rx.recv_timeout(wait) {
                Ok(ControlMsg::Write(event)) => {
                    self.pending.lock().insert(event.scope);
                    // Rearm: a burst of writes collapses into exactly
                    // one flush, debounce past the last event.
                    debounce_deadline = Some(Instant::now() + debounce);
                }
                Ok(ControlMsg::PullNow) => self.pull_all(),
                Ok(ControlMsg::Flush) => {
                    debounce_deadline = None;
                    self.flush();
                }
                Ok(ControlMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn pull_all(&self) {
        let mut sweep = DomainOutcome::default();
        for domain in &self.domains {
            sweep.absorb(domain.pull());
        }
        let mut stats = self.stats.write();
        stats.pulls += 1;
        stats.absorb(sweep);
    }

    fn flush(&self) {
        if self.pending.lock().is_empty() {
            return;
        }
        let mut cycle = DomainOutcome::default();
        for domain in &self.domains {
            // DomainSync is error-opaque: one domain failing never
            // blocks the rest.
            cycle.absorb(domain.push());
        }
        // Cleared only after every domain settled. Writes that arrived
        // mid-flush are still queued as messages and will re-add their
        // scopes and rearm the debounce.
        self.pending.lock().clear();

        let mut stats = self.stats.write();
        stats.flushes += 1;
        stats.absorb(cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WriteKind;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct CountingDomain {
        pulls: AtomicU64,
        pushes: AtomicU64,
    }

    impl CountingDomain {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pulls: AtomicU64::new(0),
                pushes: AtomicU64::new(0),
            })
        }
    }

    impl DomainSync for CountingDomain {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn pull(&self) -> DomainOutcome {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            DomainOutcome::default()
        }

        fn push(&self) -> DomainOutcome {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            DomainOutcome::default()
        }
    }

    fn quiet_config() -> SyncConfig {
        // Long poll so only explicit activity moves the counters.
        SyncConfig::new("t")
            .with_debounce(Duration::from_millis(300))
            .with_poll_interval(Duration::from_secs(3600))
    }

    fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        predicate()
    }

    #[test]
    fn start_pulls_immediately_and_is_idempotent() {
        let bus = Arc::new(LocalWriteBus::new());
        let domain = CountingDomain::new();
        let controller =
            SyncController::new(quiet_config(), Arc::clone(&bus), vec![domain.clone()]);

        controller.start();
        assert_eq!(controller.state(), ControllerState::Running);
        assert!(wait_until(Duration::from_secs(2), || {
            domain.pulls.load(Ordering::SeqCst) == 1
        }));

        // A second start changes nothing.
        controller.start();
        assert_eq!(bus.subscriber_count(), 1);

        controller.stop();
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert_eq!(bus.subscriber_count(), 0);

        // Stop is idempotent too.
        controller.stop();
    }

    #[test]
    fn disabled_controller_never_starts() {
        let bus = Arc::new(LocalWriteBus::new());
        let domain = CountingDomain::new();
        let controller = SyncController::new(
            quiet_config().with_enabled(false),
            Arc::clone(&bus),
            vec![domain.clone()],
        );

        controller.start();
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(domain.pulls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn write_burst_coalesces_into_one_flush() {
        let bus = Arc::new(LocalWriteBus::new());
        let primary = CountingDomain::new();
        let secondary = CountingDomain::new();
        let controller = SyncController::new(
            quiet_config(),
            Arc::clone(&bus),
            vec![primary.clone(), secondary.clone()],
        );
        controller.start();

        for i in 0..5 {
            bus.notify(&WriteEvent::new(format!("s{i}"), WriteKind::Session));
        }

        assert!(wait_until(Duration::from_secs(2), || {
            controller.stats().flushes == 1
        }));
        // Settle time: no further flush may follow the burst.
        thread::sleep(Duration::from_millis(500));

        assert_eq!(controller.stats().flushes, 1);
        assert_eq!(primary.pushes.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.pushes.load(Ordering::SeqCst), 1);
        controller.stop();
    }

    #[test]
    fn trigger_forces_a_pull() {
        let bus = Arc::new(LocalWriteBus::new());
        let domain = CountingDomain::new();
        let controller =
            SyncController::new(quiet_config(), Arc::clone(&bus), vec![domain.clone()]);
        controller.start();

        assert!(wait_until(Duration::from_secs(2), || {
            domain.pulls.load(Ordering::SeqCst) == 1
        }));

        controller.trigger(SyncTrigger::Reconnect);
        assert!(wait_until(Duration::from_secs(2), || {
            domain.pulls.load(Ordering::SeqCst) == 2
        }));

        controller.trigger(SyncTrigger::Foreground);
        assert!(wait_until(Duration::from_secs(2), || {
            domain.pulls.load(Ordering::SeqCst) == 3
        }));
        controller.stop();
    }

    #[test]
    fn flush_without_pending_writes_is_a_no_op() {
        let bus = Arc::new(LocalWriteBus::new());
        let domain = CountingDomain::new();
        let controller =
            SyncController::new(quiet_config(), Arc::clone(&bus), vec![domain.clone()]);
        controller.start();

        controller.flush_now();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(domain.pushes.load(Ordering::SeqCst), 0);
        assert_eq!(controller.stats().flushes, 0);
        controller.stop();
    }

    #[test]
    fn poll_timer_keeps_pulling() {
        let bus = Arc::new(LocalWriteBus::new());
        let domain = CountingDomain::new();
        // Poll floor is 5s; this test rides the floor once.
        let config = SyncConfig::new("t")
            .with_debounce(Duration::from_millis(300))
            .with_poll_interval(Duration::from_secs(5));
        let controller = SyncController::new(config, Arc::clone(&bus), vec![domain.clone()]);
        controller.start();

        assert!(wait_until(Duration::from_secs(8), || {
            domain.pulls.load(Ordering::SeqCst) >= 2
        }));
        controller.stop();
    }
}
