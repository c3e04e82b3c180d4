//! Deterministic clock for simulation
//!
//! TigerStyle: Explicit time control, no system time dependencies.
//!
//! Wall time and monotonic time are tracked separately so tests can model
//! NTP corrections: `set_wall_ms` may move wall time backwards while the
//! monotonic reading keeps increasing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_core::TimeProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// 2024-01-01T00:00:00Z
const SIM_CLOCK_START_MS_DEFAULT: u64 = 1_704_067_200_000;

/// Deterministic simulation clock
///
/// Time only advances when told to. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct SimClock {
    /// Wall time in milliseconds since epoch
    wall_ms: Arc<AtomicU64>,
    /// Monotonic milliseconds since the clock was created
    monotonic_ms: Arc<AtomicU64>,
    /// Wakes sleepers when time advances
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a clock whose wall time starts at the given instant
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::from_millis(start.timestamp_millis().max(0) as u64)
    }

    /// Create a clock whose wall time starts at `ms` since epoch
    pub fn from_millis(ms: u64) -> Self {
        Self {
            wall_ms: Arc::new(AtomicU64::new(ms)),
            monotonic_ms: Arc::new(AtomicU64::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Current wall time
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.wall_ms() as i64).unwrap_or_default()
    }

    /// Current wall time in milliseconds
    pub fn wall_ms(&self) -> u64 {
        self.wall_ms.load(Ordering::SeqCst)
    }

    /// Advance wall and monotonic time together
    pub fn advance_ms(&self, ms: u64) {
        self.wall_ms.fetch_add(ms, Ordering::SeqCst);
        self.monotonic_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Jump wall time to `ms`, possibly backwards; monotonic time is untouched
    pub fn set_wall_ms(&self, ms: u64) {
        self.wall_ms.store(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Advance only monotonic time, as a suspended VM resuming would observe
    pub fn jump_monotonic_ms(&self, ms: u64) {
        self.monotonic_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if a monotonic deadline has passed
    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.monotonic_ms.load(Ordering::SeqCst) >= deadline_ms
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::from_millis(SIM_CLOCK_START_MS_DEFAULT)
    }
}

#[async_trait]
impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        self.wall_ms()
    }

    /// Waits until monotonic time has advanced by `ms`
    async fn sleep_ms(&self, ms: u64) {
        let target_ms = self.monotonic_ms.load(Ordering::SeqCst).saturating_add(ms);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an advance between the two is not lost
            notified.as_mut().enable();
            if self.is_past_ms(target_ms) {
                return;
            }
            notified.await;
        }
    }

    fn monotonic_ms(&self) -> u64 {
        self.monotonic_ms.load(Ordering::SeqCst)
    }
}
