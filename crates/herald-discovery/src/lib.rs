//! Herald Discovery
//!
//! Registration agent for service discovery.
//!
//! # Overview
//!
//! A [`DiscoveryAgent`] keeps this process's entry in the coordination store
//! in step with three signals:
//! - the hosting server accepts connections ([`ServerStatus`])
//! - the operator has it in rotation ([`RotationStatus`], `oor` / `bir`)
//! - its health probes pass over a rolling window ([`HealthAggregator`])
//!
//! The node is published only while all three hold, and unpublished within
//! one check interval after any of them stops holding.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald_discovery::DiscoveryAgent;
//!
//! let agent = DiscoveryAgent::builder(config, "orders", 8080)
//!     .store(store)
//!     .probe(Arc::new(|| HealthStatus::Healthy))
//!     .build()?;
//! agent.start().await?;
//! // once the HTTP listener is bound:
//! agent.server_status().mark_started();
//! ```

pub mod agent;
pub mod client;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod node_id;
pub mod registration;
pub mod rotation;
pub mod shutdown;
pub mod status;
pub mod tasks;

pub use agent::{AgentState, AgentTimings, DiscoveryAgent, DiscoveryAgentBuilder};
pub use client::{DiscoveryClient, CLIENT_STALE_AFTER_MS_DEFAULT};
pub use error::{DiscoveryError, DiscoveryResult};
pub use health::{
    BlockingProbe, HealthAggregator, HealthConfig, HealthProbe, HealthSample, HealthWindow,
};
pub use lifecycle::{transition, Action, Intent, LifecycleState, RegistrationLifecycle, Signals};
pub use node_id::NodeIdAllocator;
pub use registration::ServiceRegistration;
pub use rotation::RotationStatus;
pub use shutdown::ShutdownSignal;
pub use status::ServerStatus;
pub use tasks::{AdminTask, BirTask, OorTask, TaskOutcome};
