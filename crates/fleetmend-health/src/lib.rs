//! fleetmend-health — instance health classification.
//!
//! Turns two metric series into a verdict:
//!
//! ```text
//! HealthEvaluator
//!   ├── classify(id, window)
//!   │   ├── utilization series   (Average, fixed period)
//!   │   ├── status-check series  (Maximum, fixed period)
//!   │   └── classify_series() → Healthy | Unhealthy | Unknown
//!   └── classify_all(ids, concurrency) → bounded fan-out, gathered in order
//! ```
//!
//! `Unknown` means a query failed. It is distinct from a query that
//! succeeded with zero points and is never acted on.

pub mod evaluator;

pub use evaluator::{classify_series, EvaluatorSettings, HealthEvaluator};
