//! Time-ordered ID generator
//!
//! TigerStyle: One lock over `(wall_ms, sequence)`; outputs are strictly
//! monotonic within a process.
//!
//! Per call:
//! - clock ahead of the last bucket: new bucket, sequence 0
//! - same bucket with room: sequence + 1
//! - same bucket, sequence exhausted: spin until the clock ticks (under 1 ms)
//! - clock behind the last bucket (NTP step back): stay pinned to the last
//!   bucket; if the sequence runs out while pinned, the bucket advances by one
//!   logical millisecond instead of waiting for the clock to catch up

use crate::constraint::IdConstraint;
use crate::error::{IdError, IdResult};
use crate::id::{validate_domain, Id};
use crate::node::NodeId;
use herald_core::constants::{ID_NODE_PRINTABLE_COUNT_MAX, ID_SEQUENCE_COUNT_MAX};
use herald_core::TimeProvider;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct GeneratorState {
    /// Last `(wall_ms, sequence)` handed out
    last: Option<(u64, u16)>,
    /// Whether the clock is currently behind `last`
    regressed: bool,
}

/// Generator of `<domain><timestamp><node><sequence>` identifiers
pub struct IdGenerator {
    node: NodeId,
    time: Arc<dyn TimeProvider>,
    state: Mutex<GeneratorState>,
    global_constraints: RwLock<Vec<Arc<dyn IdConstraint>>>,
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("node", &self.node)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl IdGenerator {
    /// Create a generator; the node id must fit the three-digit node field
    pub fn new(node: NodeId, time: Arc<dyn TimeProvider>) -> IdResult<Self> {
        if !node.is_printable() {
            return Err(IdError::InvalidNodeId {
                node_id: node.get() as u32,
                limit: ID_NODE_PRINTABLE_COUNT_MAX,
            });
        }
        Ok(Self {
            node,
            time,
            state: Mutex::new(GeneratorState::default()),
            global_constraints: RwLock::new(Vec::new()),
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Mint a fresh ID
    pub fn generate(&self, domain: &str) -> IdResult<Id> {
        validate_domain(domain)?;
        let (wall_ms, sequence) = self.next_slot();
        Id::from_parts(domain, wall_ms, self.node, sequence)
    }

    /// Inverse of the textual format
    pub fn parse(&self, text: &str) -> IdResult<Id> {
        Id::parse(text)
    }

    /// Constraint applied to every constrained generation unless skipped
    pub fn register_global_constraint(&self, constraint: Arc<dyn IdConstraint>) {
        self.global_constraints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(constraint);
    }

    /// Mint until an ID satisfies every constraint, up to `retries` attempts
    ///
    /// `Ok(None)` means the attempts were exhausted; errors are reserved for
    /// an invalid domain.
    pub fn generate_with_constraints(
        &self,
        domain: &str,
        constraints: &[&dyn IdConstraint],
        retries: u32,
    ) -> IdResult<Option<Id>> {
        self.generate_with_constraints_opts(domain, constraints, retries, false)
    }

    /// As [`generate_with_constraints`](Self::generate_with_constraints), optionally
    /// ignoring registered global constraints
    pub fn generate_with_constraints_opts(
        &self,
        domain: &str,
        constraints: &[&dyn IdConstraint],
        retries: u32,
        skip_global: bool,
    ) -> IdResult<Option<Id>> {
        validate_domain(domain)?;
        let globals: Vec<Arc<dyn IdConstraint>> = if skip_global {
            Vec::new()
        } else {
            self.global_constraints
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        };

        for _ in 0..retries {
            let id = self.generate(domain)?;
            let valid = constraints.iter().all(|c| c.is_valid(&id))
                && globals.iter().all(|c| c.is_valid(&id));
            if valid {
                return Ok(Some(id));
            }
        }

        debug!(domain = %domain, retries = retries, "Constrained ID generation exhausted");
        Ok(None)
    }

    fn lock_state(&self) -> MutexGuard<'_, GeneratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_slot(&self) -> (u64, u16) {
        let mut state = self.lock_state();
        let now = self.time.now_ms();

        let next = match state.last {
            None => (now, 0),
            Some((wall_ms, _)) if now > wall_ms => {
                if state.regressed {
                    debug!(wall_ms = wall_ms, now_ms = now, "Clock caught up with pinned bucket");
                    state.regressed = false;
                }
                (now, 0)
            }
            Some((wall_ms, sequence)) => {
                if now < wall_ms && !state.regressed {
                    warn!(
                        wall_ms = wall_ms,
                        now_ms = now,
                        "Wall clock moved backwards; pinning ID timestamp"
                    );
                    state.regressed = true;
                }
                if sequence + 1 < ID_SEQUENCE_COUNT_MAX {
                    (wall_ms, sequence + 1)
                } else if now < wall_ms {
                    (wall_ms + 1, 0)
                } else {
                    (self.spin_past(wall_ms), 0)
                }
            }
        };

        debug_assert!(next.1 < ID_SEQUENCE_COUNT_MAX);
        debug_assert!(state.last.map_or(true, |last| next > last));
        state.last = Some(next);
        next
    }

    /// Wait for the clock to leave `wall_ms`; bounded by one clock tick
    fn spin_past(&self, wall_ms: u64) -> u64 {
        loop {
            std::hint::spin_loop();
            std::thread::yield_now();
            let now = self.time.now_ms();
            if now > wall_ms {
                return now;
            }
            if now < wall_ms {
                // Stepped back mid-spin; take the next logical bucket
                return wall_ms + 1;
            }
        }
    }
}
