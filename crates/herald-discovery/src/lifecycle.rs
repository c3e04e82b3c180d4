//! Registration lifecycle
//!
//! TigerStyle: Pure transition table, side effects applied by one owner.
//!
//! ```text
//! BOOT ──► WAITING_FOR_SERVER ──S──► UNPUBLISHED ──R∧H / publish──► PUBLISHED_IN
//!                                                                   │    ▲
//!                                                ¬(R∧H) / unpublish │    │ R∧H / publish
//!                                                                   ▼    │
//!                                                                PUBLISHED_OUT
//! any non-STOPPED ──stop / unpublish──► STOPPED
//! ```
//!
//! [`transition`] is a pure function of the current state and the sampled
//! signals. [`RegistrationLifecycle`] owns the state, samples the signals,
//! and applies the resulting store action. It is driven by a single task, so
//! transitions are totally ordered.

use crate::health::HealthAggregator;
use crate::registration::ServiceRegistration;
use crate::rotation::RotationStatus;
use crate::status::ServerStatus;
use herald_core::TimeProvider;
use herald_registry::{
    ConnectionEvent, CoordinationStore, HealthStatus, StoreError, StoreOp, StoreResult,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Transitions applied within one tick before yielding
///
/// BOOT → WAITING_FOR_SERVER → UNPUBLISHED → PUBLISHED_IN is the longest
/// side-effect-free chain plus its terminal action.
const TICK_TRANSITIONS_COUNT_MAX: usize = 4;

/// Registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Boot,
    WaitingForServer,
    Unpublished,
    PublishedIn,
    PublishedOut,
    Stopped,
}

impl LifecycleState {
    /// Whether peers should currently see this node
    pub fn is_published(&self) -> bool {
        matches!(self, Self::PublishedIn)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boot => "BOOT",
            Self::WaitingForServer => "WAITING_FOR_SERVER",
            Self::Unpublished => "UNPUBLISHED",
            Self::PublishedIn => "PUBLISHED_IN",
            Self::PublishedOut => "PUBLISHED_OUT",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Inputs sampled at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    /// Server-start latch
    pub server_started: bool,
    /// Rotation flag
    pub in_rotation: bool,
    /// Aggregate health
    pub healthy: bool,
}

impl Signals {
    pub fn new(server_started: bool, in_rotation: bool, healthy: bool) -> Self {
        Self {
            server_started,
            in_rotation,
            healthy,
        }
    }

    /// R ∧ H
    pub fn should_publish(&self) -> bool {
        self.in_rotation && self.healthy
    }
}

/// Store side effect of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Publish,
    Unpublish,
    /// Re-publish an already published node to bump its timestamp
    Refresh,
}

/// Next state and the side effect that must succeed to enter it
pub fn transition(state: LifecycleState, signals: Signals) -> (LifecycleState, Action) {
    use LifecycleState::*;
    match state {
        Boot => (WaitingForServer, Action::None),
        WaitingForServer if signals.server_started => (Unpublished, Action::None),
        WaitingForServer => (WaitingForServer, Action::None),
        Unpublished | PublishedOut if signals.should_publish() => (PublishedIn, Action::Publish),
        Unpublished => (Unpublished, Action::None),
        PublishedOut => (PublishedOut, Action::None),
        PublishedIn if signals.should_publish() => (PublishedIn, Action::Refresh),
        PublishedIn => (PublishedOut, Action::Unpublish),
        Stopped => (Stopped, Action::None),
    }
}

/// Last store mutation the lifecycle meant to have in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Published,
    Unpublished,
}

/// Owner of the registration state and its store side effects
pub struct RegistrationLifecycle {
    registration: ServiceRegistration,
    store: Arc<dyn CoordinationStore>,
    rotation: RotationStatus,
    health: Arc<HealthAggregator>,
    server: ServerStatus,
    time: Arc<dyn TimeProvider>,
    operation_timeout_ms: u64,
    state: LifecycleState,
    intent: Option<Intent>,
    observers: Arc<watch::Sender<LifecycleState>>,
}

impl fmt::Debug for RegistrationLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationLifecycle")
            .field("service", &self.registration.service_name)
            .field("state", &self.state)
            .field("intent", &self.intent)
            .finish_non_exhaustive()
    }
}

impl RegistrationLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration: ServiceRegistration,
        store: Arc<dyn CoordinationStore>,
        rotation: RotationStatus,
        health: Arc<HealthAggregator>,
        server: ServerStatus,
        time: Arc<dyn TimeProvider>,
        operation_timeout_ms: u64,
        observers: Arc<watch::Sender<LifecycleState>>,
    ) -> Self {
        assert!(operation_timeout_ms > 0, "store timeout must be positive");
        observers.send_replace(LifecycleState::Boot);
        Self {
            registration,
            store,
            rotation,
            health,
            server,
            time,
            operation_timeout_ms,
            state: LifecycleState::Boot,
            intent: None,
            observers,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    /// Sample S, R and H now
    pub fn sample(&self) -> Signals {
        Signals::new(
            self.server.is_started(),
            self.rotation.is_in_rotation(),
            self.health.is_healthy(),
        )
    }

    /// One decision tick
    ///
    /// Applies transitions until one needs a store call or the state stops
    /// changing, so a fresh agent can publish on its first tick.
    pub async fn tick(&mut self) -> LifecycleState {
        let signals = self.sample();
        for _ in 0..TICK_TRANSITIONS_COUNT_MAX {
            let (next, action) = transition(self.state, signals);
            let entered = match action {
                Action::None => true,
                Action::Publish => self.publish().await,
                Action::Unpublish => self.unpublish().await,
                Action::Refresh => {
                    self.refresh().await;
                    true
                }
            };
            if !entered || next == self.state {
                break;
            }
            self.enter(next);
            if action != Action::None {
                break;
            }
        }
        self.state
    }

    /// React to a connection-state change from the store
    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Disconnected => {
                info!(state = %self.state, "Coordination store disconnected");
            }
            ConnectionEvent::Reconnected { session_expired } => {
                info!(
                    state = %self.state,
                    session_expired = session_expired,
                    "Coordination store reconnected; resynchronizing"
                );
                self.resync().await;
            }
        }
    }

    /// Re-issue the last intended mutation regardless of local belief
    async fn resync(&mut self) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        match self.intent {
            Some(Intent::Published) => {
                if self.publish().await {
                    self.enter(LifecycleState::PublishedIn);
                }
            }
            Some(Intent::Unpublished) => {
                if self.unpublish().await && self.state == LifecycleState::PublishedIn {
                    self.enter(LifecycleState::PublishedOut);
                }
            }
            None => debug!("Nothing published yet; no resync needed"),
        }
    }

    /// Best-effort unpublish and enter STOPPED
    pub async fn stop(&mut self) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        if self.intent.is_some() {
            self.unpublish().await;
        }
        self.enter(LifecycleState::Stopped);
    }

    fn enter(&mut self, next: LifecycleState) {
        if next != self.state {
            info!(
                service = %self.registration.service_name,
                from = %self.state,
                to = %next,
                "Lifecycle transition"
            );
            self.state = next;
            self.observers.send_replace(next);
        }
    }

    /// Returns whether the node is now published
    async fn publish(&mut self) -> bool {
        self.intent = Some(Intent::Published);
        let node = self
            .registration
            .to_node(HealthStatus::Healthy, self.time.now_ms());
        let service = self.registration.service_name.clone();
        let result = self
            .bounded(StoreOp::Publish, self.store.publish(&service, &node))
            .await;
        self.settle(StoreOp::Publish, result)
    }

    /// Returns whether the node is now unpublished
    async fn unpublish(&mut self) -> bool {
        self.intent = Some(Intent::Unpublished);
        let key = self.registration.key();
        let service = self.registration.service_name.clone();
        let result = self
            .bounded(StoreOp::Unpublish, self.store.unpublish(&service, &key))
            .await;
        self.settle(StoreOp::Unpublish, result)
    }

    async fn refresh(&mut self) {
        let node = self
            .registration
            .to_node(HealthStatus::Healthy, self.time.now_ms());
        let service = self.registration.service_name.clone();
        let result = self
            .bounded(StoreOp::Publish, self.store.publish(&service, &node))
            .await;
        if let Err(e) = result {
            debug!(error = %e, "Registration refresh failed");
        }
    }

    async fn bounded<F>(&self, op: StoreOp, call: F) -> StoreResult<()>
    where
        F: Future<Output = StoreResult<()>>,
    {
        let timeout = Duration::from_millis(self.operation_timeout_ms);
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(op.as_str(), self.operation_timeout_ms)),
        }
    }

    fn settle(&self, op: StoreOp, result: StoreResult<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) if e.is_retriable() => {
                warn!(
                    op = %op,
                    state = %self.state,
                    error = %e,
                    "Store call failed; retrying next tick"
                );
                false
            }
            Err(e) => {
                error!(
                    op = %op,
                    state = %self.state,
                    error = %e,
                    "Store call failed permanently; keeping state"
                );
                false
            }
        }
    }
}
