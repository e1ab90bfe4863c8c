//! Configuration for the sync engine.

use std::time::Duration;

/// Floor for the debounce window; bursts are never coalesced tighter
/// than this.
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(300);

/// Floor for the poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration recognized by the sync controller and services.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Master on/off switch. When false, `start()` is a no-op.
    pub enabled: bool,
    /// Key namespace for every synced domain.
    pub ns: String,
    /// Coalescing window for push triggers. Clamped to
    /// [`MIN_DEBOUNCE`] at use.
    pub debounce: Duration,
    /// Periodic pull interval. Clamped to [`MIN_POLL_INTERVAL`] at use.
    pub poll_interval: Duration,
    /// Width of the push worker pool. Clamped to at least 1 at use.
    pub max_concurrent_pushes: usize,
}

impl SyncConfig {
    /// Creates a configuration for a namespace with default timings.
    pub fn new(ns: impl Into<String>) -> Self {
        Self {
            enabled: true,
            ns: ns.into(),
            debounce: Duration::from_millis(1000),
            poll_interval: Duration::from_secs(30),
            max_concurrent_pushes: 3,
        }
    }

    /// Sets the master switch.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the push worker pool width.
    pub fn with_max_concurrent_pushes(mut self, width: usize) -> Self {
        self.max_concurrent_pushes = width;
        self
    }

    /// The debounce window with the runtime floor applied.
    pub fn effective_debounce(&self) -> Duration {
        self.debounce.max(MIN_DEBOUNCE)
    }

    /// The poll interval with the runtime floor applied.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }

    /// The worker pool width with the runtime floor applied.
    pub fn effective_push_width(&self) -> usize {
        self.max_concurrent_pushes.max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("folio")
    }
}
