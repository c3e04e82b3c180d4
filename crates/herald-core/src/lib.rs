//! Herald Core
//!
//! Core types, errors, constants and I/O abstractions shared by every Herald
//! crate.
//!
//! # Overview
//!
//! Herald is a service-discovery registration agent: it publishes a running
//! process into a coordination store, keeps the advertisement in step with
//! operator rotation and application health, and issues time-ordered IDs that
//! encode the node that minted them.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `ID_SEQUENCE_COUNT_MAX`)
//! - Time and randomness only through [`TimeProvider`] and [`RngProvider`]
//! - No recursion (bounded iteration only)

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod telemetry;

pub use config::DiscoveryConfig;
pub use constants::*;
pub use error::{Error, Result};
pub use io::{IoContext, RngProvider, StdRngProvider, TimeProvider, WallClockTime};
pub use telemetry::{init_telemetry, TelemetryConfig};
