//! fleetmend-core — shared types, configuration, and provider interfaces.
//!
//! The compute control plane and the metrics provider are external
//! collaborators; this crate defines the traits the rest of FleetMend
//! programs against, plus the `fleetmend.toml` configuration model.

pub mod config;
pub mod provider;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use config::FleetConfig;
pub use provider::{ComputeControlPlane, MetricsProvider, ProviderError, ProviderFuture};
pub use types::*;
