//! fleetmend-state — durable remediation records for FleetMend.
//!
//! Backed by [redb](https://docs.rs/redb). One record per instance id,
//! JSON-serialized into a single table. The number of in-flight
//! remediations is never stored; it is always derived by scanning for
//! `PendingRestart` records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{RecordStore, StateStore};
pub use types::*;
