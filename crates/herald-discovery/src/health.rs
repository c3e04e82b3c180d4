//! Rolling health aggregation
//!
//! TigerStyle: Bounded window, explicit staleness, probes never trusted.
//!
//! Every `probe_interval_ms` all registered probes run; their AND becomes one
//! sample in a ring of `ceil(staleness / interval)` slots. The aggregate is
//! healthy only when the window holds at least one fresh sample and every
//! fresh sample is healthy. A probe that errors, panics or overruns its
//! timeout counts as unhealthy for that sample.

use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use futures::FutureExt;
use herald_core::constants::{
    HEALTH_PROBE_TIMEOUT_MS_MAX, HEALTH_STALENESS_SLACK_MS_DEFAULT,
    HEALTH_WINDOW_SAMPLES_COUNT_MAX,
};
use herald_core::TimeProvider;
use herald_registry::HealthStatus;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Application health check
///
/// Probes may block or fail; the aggregator bounds each call with a timeout.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "probe"
    }

    async fn check(&self) -> anyhow::Result<HealthStatus>;
}

/// Plain closures are synchronous checks and run on the blocking pool
#[async_trait]
impl<F> HealthProbe for F
where
    F: Fn() -> HealthStatus + Clone + Send + Sync + 'static,
{
    async fn check(&self) -> anyhow::Result<HealthStatus> {
        run_blocking(self.clone()).await
    }
}

/// Named synchronous check, for closures that cannot be cloned
///
/// The check runs on tokio's blocking pool, so a slow call occupies a
/// blocking thread rather than a runtime worker and the aggregator's timeout
/// still fires. A check that overruns keeps its thread until it returns.
pub struct BlockingProbe<F> {
    name: String,
    check: Arc<F>,
}

impl<F> BlockingProbe<F>
where
    F: Fn() -> HealthStatus + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }
}

#[async_trait]
impl<F> HealthProbe for BlockingProbe<F>
where
    F: Fn() -> HealthStatus + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> anyhow::Result<HealthStatus> {
        let check = self.check.clone();
        run_blocking(move || check()).await
    }
}

async fn run_blocking<F>(check: F) -> anyhow::Result<HealthStatus>
where
    F: FnOnce() -> HealthStatus + Send + 'static,
{
    tokio::task::spawn_blocking(check).await.map_err(|e| {
        if e.is_panic() {
            anyhow::anyhow!("probe panicked")
        } else {
            anyhow::anyhow!("probe cancelled: {}", e)
        }
    })
}

/// One aggregated sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSample {
    pub at_ms: u64,
    pub healthy: bool,
}

/// Fixed-capacity ring of samples ordered by timestamp
#[derive(Debug, Clone)]
pub struct HealthWindow {
    samples: VecDeque<HealthSample>,
    capacity: usize,
    staleness_ms: u64,
}

impl HealthWindow {
    /// # Panics
    ///
    /// If `capacity` is zero. Configuration validation rejects the inputs
    /// that would produce one.
    pub fn new(capacity: usize, staleness_ms: u64) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        let capacity = capacity.min(HEALTH_WINDOW_SAMPLES_COUNT_MAX);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            staleness_ms,
        }
    }

    /// Capacity `ceil(staleness / interval)`, at least one slot
    ///
    /// # Panics
    ///
    /// If `probe_interval_ms` is zero; `DiscoveryConfig::validate` and
    /// `AgentTimings::validate` reject that first.
    pub fn capacity_for(probe_interval_ms: u64, staleness_ms: u64) -> usize {
        assert!(probe_interval_ms > 0, "probe interval must be positive");
        let slots = staleness_ms.div_ceil(probe_interval_ms).max(1);
        usize::try_from(slots)
            .unwrap_or(HEALTH_WINDOW_SAMPLES_COUNT_MAX)
            .min(HEALTH_WINDOW_SAMPLES_COUNT_MAX)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn newest(&self) -> Option<HealthSample> {
        self.samples.back().copied()
    }

    /// Append a sample, evicting by capacity and by age
    ///
    /// A timestamp older than the newest sample is clamped up to it so the
    /// window stays ordered.
    pub fn record(&mut self, now_ms: u64, healthy: bool) {
        let at_ms = self.newest().map_or(now_ms, |last| last.at_ms.max(now_ms));
        self.samples.push_back(HealthSample { at_ms, healthy });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if now_ms.saturating_sub(front.at_ms) > self.staleness_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        debug_assert!(self.samples.len() <= self.capacity);
    }

    /// Healthy iff at least one fresh sample exists and all fresh samples are healthy
    pub fn aggregate_healthy(&self, now_ms: u64) -> bool {
        let mut fresh = self
            .samples
            .iter()
            .filter(|s| now_ms.saturating_sub(s.at_ms) <= self.staleness_ms)
            .peekable();
        if fresh.peek().is_none() {
            return false;
        }
        fresh.all(|s| s.healthy)
    }
}

/// Timing for the aggregator, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub probe_interval_ms: u64,
    pub staleness_ms: u64,
    /// Added to the staleness bound to absorb scheduling jitter; a sample
    /// stays fresh up to `staleness_ms + slack_ms` old
    pub slack_ms: u64,
    pub probe_timeout_ms: u64,
}

impl HealthConfig {
    pub fn new(probe_interval_ms: u64, staleness_ms: u64) -> Self {
        Self {
            probe_interval_ms,
            staleness_ms,
            slack_ms: HEALTH_STALENESS_SLACK_MS_DEFAULT,
            probe_timeout_ms: probe_interval_ms.min(HEALTH_PROBE_TIMEOUT_MS_MAX),
        }
    }

    pub fn with_slack_ms(mut self, slack_ms: u64) -> Self {
        self.slack_ms = slack_ms;
        self
    }

    pub fn with_probe_timeout_ms(mut self, probe_timeout_ms: u64) -> Self {
        self.probe_timeout_ms = probe_timeout_ms;
        self
    }

    /// Age beyond which a sample no longer counts
    ///
    /// Never shorter than one interval, otherwise the newest sample would
    /// routinely expire just before the next probe lands.
    pub fn effective_staleness_ms(&self) -> u64 {
        self.staleness_ms.max(self.probe_interval_ms) + self.slack_ms
    }
}

/// Runs probes on a schedule and answers "is the application healthy?"
pub struct HealthAggregator {
    config: HealthConfig,
    probes: RwLock<Vec<Arc<dyn HealthProbe>>>,
    window: Mutex<HealthWindow>,
    time: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("config", &self.config)
            .field("probes", &self.probe_count())
            .finish_non_exhaustive()
    }
}

impl HealthAggregator {
    /// # Panics
    ///
    /// If `config.probe_interval_ms` is zero.
    pub fn new(config: HealthConfig, time: Arc<dyn TimeProvider>) -> Self {
        assert!(config.probe_interval_ms > 0, "probe interval must be positive");
        if config.probe_interval_ms > config.staleness_ms {
            warn!(
                probe_interval_ms = config.probe_interval_ms,
                staleness_ms = config.staleness_ms,
                "Health check interval exceeds staleness; widening staleness to one interval"
            );
        }
        let capacity = HealthWindow::capacity_for(config.probe_interval_ms, config.staleness_ms);
        let window = HealthWindow::new(capacity, config.effective_staleness_ms());
        Self {
            config,
            probes: RwLock::new(Vec::new()),
            window: Mutex::new(window),
            time,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Add a probe; it participates from the next sample on
    pub fn register_probe(&self, probe: Arc<dyn HealthProbe>) {
        let mut probes = self.probes.write().unwrap_or_else(PoisonError::into_inner);
        probes.push(probe);
        debug!(count = probes.len(), "Health probe registered");
    }

    pub fn probe_count(&self) -> usize {
        self.probes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run every probe once and record the AND as one sample
    pub async fn probe_once(&self) -> HealthStatus {
        let probes: Vec<Arc<dyn HealthProbe>> = self
            .probes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let status = if probes.is_empty() {
            debug!("No health probes registered; sampling unhealthy");
            HealthStatus::Unhealthy
        } else {
            let mut status = HealthStatus::Healthy;
            for probe in &probes {
                status = status.and(self.run_probe(probe.as_ref()).await);
            }
            status
        };

        let now_ms = self.time.monotonic_ms();
        self.lock_window().record(now_ms, status.is_healthy());
        status
    }

    async fn run_probe(&self, probe: &dyn HealthProbe) -> HealthStatus {
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let outcome =
            tokio::time::timeout(timeout, AssertUnwindSafe(probe.check()).catch_unwind()).await;
        match outcome {
            Ok(Ok(Ok(status))) => status,
            Ok(Ok(Err(e))) => {
                warn!(probe = probe.name(), error = %e, "Health probe failed");
                HealthStatus::Unhealthy
            }
            Ok(Err(_)) => {
                warn!(probe = probe.name(), "Health probe panicked");
                HealthStatus::Unhealthy
            }
            Err(_) => {
                warn!(
                    probe = probe.name(),
                    timeout_ms = self.config.probe_timeout_ms,
                    "Health probe timed out"
                );
                HealthStatus::Unhealthy
            }
        }
    }

    /// Current aggregate at monotonic now
    pub fn is_healthy(&self) -> bool {
        let now_ms = self.time.monotonic_ms();
        self.lock_window().aggregate_healthy(now_ms)
    }

    pub fn window(&self) -> HealthWindow {
        self.lock_window().clone()
    }

    /// Probe every interval until shutdown; the first probe runs immediately
    pub async fn run(self: Arc<Self>, shutdown: Arc<ShutdownSignal>) {
        let interval_ms = self.config.probe_interval_ms;
        let mut next_at_ms = self.time.monotonic_ms();
        loop {
            if shutdown.is_triggered() {
                break;
            }
            self.probe_once().await;

            next_at_ms += interval_ms;
            let now_ms = self.time.monotonic_ms();
            if now_ms >= next_at_ms {
                // Probes overran the interval; realign instead of bursting
                next_at_ms = now_ms;
                continue;
            }
            tokio::select! {
                _ = self.time.sleep_ms(next_at_ms - now_ms) => {}
                _ = shutdown.wait() => break,
            }
        }
        debug!("Health probe task shutting down");
    }

    fn lock_window(&self) -> MutexGuard<'_, HealthWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
