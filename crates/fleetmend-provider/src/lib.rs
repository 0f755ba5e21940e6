//! fleetmend-provider — HTTP/JSON gateway clients.
//!
//! Implements the `ComputeControlPlane` and `MetricsProvider` interfaces
//! from `fleetmend-core` against a gateway that fronts the cloud APIs.
//!
//! | Call | Route |
//! |---|---|
//! | describe (filter or ids) | `POST /v1/instances/describe` |
//! | force stop | `POST /v1/instances/stop` |
//! | start | `POST /v1/instances/start` |
//! | reboot | `POST /v1/instances/reboot` |
//! | time series | `POST /v1/metrics/query` |

pub mod compute;
pub mod gateway;
pub mod metrics;

use fleetmend_core::config::{ConfigError, ProviderConfig};

pub use compute::HttpComputeClient;
pub use gateway::Gateway;
pub use metrics::HttpMetricsClient;

/// Build both clients from the `[provider]` config section.
pub fn clients_from_config(config: &ProviderConfig) -> Result<(HttpComputeClient, HttpMetricsClient), ConfigError> {
    let timeout = config.timeout()?;
    Ok((
        HttpComputeClient::new(config.compute_address.clone(), timeout),
        HttpMetricsClient::new(config.metrics_address.clone(), timeout),
    ))
}
