//! I/O abstraction layer
//!
//! TigerStyle: Time and randomness go through traits so the same agent code
//! runs against the wall clock in production and a simulated clock in tests.
//!
//! ```text
//!   lifecycle / health / idgen  (same code)
//!                │
//!        TimeProvider, RngProvider
//!          ┌─────┴──────┐
//!     WallClockTime   SimClock (herald-dst)
//!     StdRngProvider  DeterministicRng (herald-dst)
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Anchor for the process-wide monotonic clock
static MONOTONIC_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// `now_ms` is wall-clock time and may jump in either direction (NTP).
/// `monotonic_ms` never decreases and is what interval and staleness logic
/// measures against.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Wall-clock milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);

    /// Monotonic milliseconds from an arbitrary origin
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Production time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    fn monotonic_ms(&self) -> u64 {
        MONOTONIC_ANCHOR.elapsed().as_millis() as u64
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number generator abstraction
///
/// Not cryptographically secure. Used for node selection and jitter only.
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64
    fn next_u64(&self) -> u64;

    /// Generate a random value in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        min + self.next_u64() % (max - min)
    }

    /// Generate a random index into a collection of `len` items
    fn gen_index(&self, len: usize) -> usize {
        assert!(len > 0, "cannot pick from an empty collection");
        self.gen_range(0, len as u64) as usize
    }
}

/// Production RNG provider (lock-free xorshift64*)
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Create a provider seeded from the system clock
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }

    /// Create with a specific seed; a zero seed would stall xorshift
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed.max(1)),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = current;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            match self
                .state
                .compare_exchange_weak(current, x, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return x.wrapping_mul(0x2545_F491_4F6C_DD1D),
                Err(actual) => current = actual,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of I/O providers handed to every Herald component
#[derive(Clone)]
pub struct IoContext {
    pub time: Arc<dyn TimeProvider>,
    pub rng: Arc<dyn RngProvider>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Real wall clock and time-seeded RNG
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    pub fn monotonic_ms(&self) -> u64 {
        self.time.monotonic_ms()
    }

    pub async fn sleep_ms(&self, ms: u64) {
        self.time.sleep_ms(ms).await;
    }
}
