//! Common test utilities for herald-discovery DST tests
//!
//! One simulated ensemble, one agent under test, and a separate observer
//! session that lists the service the way a peer would.

#![allow(dead_code)]

use herald_core::{DiscoveryConfig, IoContext};
use herald_discovery::DiscoveryAgent;
use herald_dst::{settle, DeterministicRng, SimClock};
use herald_registry::{
    CoordinationStore, HealthStatus, MemoryEnsemble, MemoryStore, NodeKey, ServiceNode,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub const SERVICE: &str = "TestService";
pub const HOST: &str = "CustomHost";
pub const PORT: u16 = 21000;

/// Simulation step used by [`Harness::eventually`]
pub const STEP_MS: u64 = 250;

/// Probe whose answer the test flips
#[derive(Debug, Clone)]
pub struct SwitchProbe {
    healthy: Arc<AtomicBool>,
    calls: Arc<AtomicU32>,
}

impl SwitchProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(healthy)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn as_probe(&self) -> Arc<dyn herald_discovery::HealthProbe> {
        let healthy = self.healthy.clone();
        let calls = self.calls.clone();
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            HealthStatus::from(healthy.load(Ordering::SeqCst))
        })
    }
}

pub fn config(interval_secs: u64, staleness_secs: u64) -> DiscoveryConfig {
    DiscoveryConfig::default()
        .with_environment("testing")
        .with_published_host(HOST)
        .with_published_port(PORT)
        .with_initial_rotation_status(true)
        .with_health_checks(interval_secs, staleness_secs)
}

pub struct Harness {
    pub clock: SimClock,
    pub ensemble: MemoryEnsemble,
    /// The agent's own session
    pub store: Arc<MemoryStore>,
    /// A peer's session
    pub observer: MemoryStore,
    pub agent: DiscoveryAgent,
    pub probe: SwitchProbe,
}

impl Harness {
    pub async fn new(config: DiscoveryConfig, seed: u64) -> Self {
        Self::with_probe(config, seed, SwitchProbe::new(true)).await
    }

    pub async fn with_probe(config: DiscoveryConfig, seed: u64, probe: SwitchProbe) -> Self {
        let clock = SimClock::default();
        let ensemble = MemoryEnsemble::new();
        let store = Arc::new(ensemble.client("herald"));
        let observer = ensemble.client("herald");
        observer.connect().await.unwrap();

        let io = IoContext::new(Arc::new(clock.clone()), Arc::new(DeterministicRng::new(seed)));
        let agent = DiscoveryAgent::builder(config, SERVICE, 8080)
            .store(store.clone())
            .io(io)
            .probe(probe.as_probe())
            .build()
            .unwrap();

        Self {
            clock,
            ensemble,
            store,
            observer,
            agent,
            probe,
        }
    }

    /// Start the agent with the server already accepting connections
    pub async fn start_serving(&self) {
        self.agent.server_status().mark_started();
        self.agent.start().await.unwrap();
        settle().await;
    }

    pub fn interval_ms(&self) -> u64 {
        self.agent.timings().check_interval_ms
    }

    pub async fn advance(&self, ms: u64) {
        let mut remaining = ms;
        while remaining > 0 {
            let step = remaining.min(STEP_MS);
            self.clock.advance_ms(step);
            settle().await;
            remaining -= step;
        }
    }

    pub async fn listed(&self) -> Vec<ServiceNode> {
        self.observer.list_nodes(SERVICE).await.unwrap()
    }

    pub async fn is_listed(&self) -> bool {
        let key = NodeKey::new(HOST, PORT);
        self.listed().await.iter().any(|n| n.key() == key)
    }

    /// Advance in small steps until `want` matches; returns the elapsed time
    pub async fn eventually_listed(&self, want: bool, limit_ms: u64) -> Option<u64> {
        let mut elapsed = 0;
        loop {
            if self.is_listed().await == want {
                return Some(elapsed);
            }
            if elapsed >= limit_ms {
                return None;
            }
            self.advance(STEP_MS).await;
            elapsed += STEP_MS;
        }
    }
}
