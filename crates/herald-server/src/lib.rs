//! Herald Server
//!
//! Admin HTTP surface for a [`DiscoveryAgent`](herald_discovery::DiscoveryAgent).

pub mod admin;
pub mod models;

pub use admin::{router, AdminState};
