//! Interfaces to the compute control plane and the metrics provider.
//!
//! Both traits return boxed `Send` futures so implementations can be held
//! as `Arc<dyn ...>` and swapped for in-memory doubles in tests.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::types::{InstanceFilter, InstanceId, InstancePage, InstanceSummary, SeriesQuery};

/// Errors returned by compute or metrics provider calls.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never completed (connect, handshake, or I/O failure).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Boxed future alias for provider call results.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Start/stop/describe operations on compute instances.
pub trait ComputeControlPlane: Send + Sync {
    /// One page of running instances matching the filter.
    fn describe_running_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
        next_token: Option<&'a str>,
    ) -> ProviderFuture<'a, InstancePage>;

    /// Current state of the named instances. Unknown ids are omitted.
    fn describe_instances<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, Vec<InstanceSummary>>;

    /// Stop with force semantics (no graceful OS shutdown).
    fn force_stop<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()>;

    fn start<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()>;

    fn reboot<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()>;
}

/// Time-series source for instance health signals.
pub trait MetricsProvider: Send + Sync {
    /// Samples for the query, oldest first. An empty vector means the query
    /// succeeded but the window held no data points.
    fn query_time_series<'a>(&'a self, query: &'a SeriesQuery) -> ProviderFuture<'a, Vec<f64>>;
}
