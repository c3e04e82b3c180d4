//! Herald DST - Deterministic Simulation Testing
//!
//! # Overview
//!
//! Herald's agent is driven entirely by `TimeProvider` and `RngProvider`, so
//! tests swap in:
//! - [`SimClock`]: wall and monotonic time that only move when told to
//! - [`DeterministicRng`]: seeded ChaCha20 stream (`DST_SEED` to replay)
//!
//! # Example
//!
//! ```rust,ignore
//! use herald_dst::{settle, SimClock};
//!
//! let clock = SimClock::default();
//! // start an agent with clock.clone() as its TimeProvider ...
//! clock.advance_ms(2_000);
//! settle().await;
//! ```
//!
//! # TigerStyle
//!
//! - All operations are deterministic given the same seed
//! - Always log the seed for reproducibility

pub mod clock;
pub mod rng;

pub use clock::SimClock;
pub use rng::DeterministicRng;

/// Scheduler yields per settle round
const SETTLE_YIELDS_COUNT: usize = 64;

/// Rounds per [`settle`]; each ends with a short real-time pause
const SETTLE_ROUNDS_COUNT: usize = 4;

/// Real time granted per round to work on tokio's blocking pool
const SETTLE_PAUSE_MS: u64 = 2;

/// Let spawned tasks on a current-thread runtime run until they block again
///
/// Synchronous health probes finish on blocking-pool threads, outside the
/// scheduler's control, so each round also waits a little real time for
/// them to hand their results back.
pub async fn settle() {
    for _ in 0..SETTLE_ROUNDS_COUNT {
        for _ in 0..SETTLE_YIELDS_COUNT {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(SETTLE_PAUSE_MS)).await;
    }
    for _ in 0..SETTLE_YIELDS_COUNT {
        tokio::task::yield_now().await;
    }
}
