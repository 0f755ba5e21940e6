//! Health classification from metric series.
//!
//! An instance is unhealthy when its utilization series is empty (the
//! signal vanished) or when its latest status-check sample reports a
//! failure. A query that errors is never read as "no data": it yields
//! `HealthStatus::Unknown` and the instance is left alone this cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use fleetmend_core::config::{ConfigError, HealthConfig};
use fleetmend_core::{HealthStatus, InstanceId, MetricsProvider, ProviderError, SeriesQuery, Statistic};

/// Parsed health inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorSettings {
    pub window: Duration,
    pub period: Duration,
    pub max_points: u32,
    pub utilization_metric: String,
    pub status_check_metric: String,
    pub failure_value: f64,
}

impl EvaluatorSettings {
    pub fn from_config(config: &HealthConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            window: config.window()?,
            period: config.period()?,
            max_points: config.max_points,
            utilization_metric: config.utilization_metric.clone(),
            status_check_metric: config.status_check_metric.clone(),
            failure_value: config.failure_value,
        })
    }
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        // HealthConfig defaults always parse.
        Self::from_config(&HealthConfig::default()).unwrap_or(Self {
            window: Duration::from_secs(360),
            period: Duration::from_secs(300),
            max_points: 10,
            utilization_metric: "CPUUtilization".to_string(),
            status_check_metric: "StatusCheckFailed".to_string(),
            failure_value: 1.0,
        })
    }
}

/// Classifies instances by querying the metrics provider.
pub struct HealthEvaluator {
    metrics: Arc<dyn MetricsProvider>,
    settings: EvaluatorSettings,
}

impl HealthEvaluator {
    pub fn new(metrics: Arc<dyn MetricsProvider>, settings: EvaluatorSettings) -> Self {
        Self { metrics, settings }
    }

    /// The configured trailing window.
    pub fn window(&self) -> Duration {
        self.settings.window
    }

    /// Classify one instance over a trailing `window`.
    ///
    /// Both series are queried concurrently.
    pub async fn classify(&self, instance_id: &str, window: Duration) -> HealthStatus {
        let utilization = self.query(instance_id, &self.settings.utilization_metric, Statistic::Average, window);
        let status = self.query(instance_id, &self.settings.status_check_metric, Statistic::Maximum, window);
        let (utilization, status) = tokio::join!(utilization, status);

        let verdict = classify_series(utilization.as_deref(), status.as_deref(), self.settings.failure_value);
        match (&utilization, &status, verdict) {
            (Err(e), _, _) | (_, Err(e), _) => {
                warn!(%instance_id, error = %e, "metrics query failed, health unknown");
            }
            (Ok(u), Ok(s), verdict) => {
                debug!(
                    %instance_id,
                    utilization_points = u.len(),
                    status_points = s.len(),
                    ?verdict,
                    "instance classified"
                );
            }
        }
        verdict
    }

    /// Classify many instances, at most `concurrency` at a time.
    ///
    /// All verdicts are gathered before returning, in input order.
    pub async fn classify_all(
        self: &Arc<Self>,
        instance_ids: &[InstanceId],
        concurrency: usize,
    ) -> Vec<(InstanceId, HealthStatus)> {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let window = self.settings.window;
        let mut tasks = JoinSet::new();

        for (index, id) in instance_ids.iter().enumerate() {
            let evaluator = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let id = id.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let status = evaluator.classify(&id, window).await;
                (index, status)
            });
        }

        let mut verdicts = vec![HealthStatus::Unknown; instance_ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, status)) => verdicts[index] = status,
                Err(e) => warn!(error = %e, "health evaluation task failed"),
            }
        }

        instance_ids.iter().cloned().zip(verdicts).collect()
    }

    async fn query(
        &self,
        instance_id: &str,
        metric: &str,
        statistic: Statistic,
        window: Duration,
    ) -> Result<Vec<f64>, ProviderError> {
        let query = SeriesQuery {
            instance_id: instance_id.to_string(),
            metric: metric.to_string(),
            statistic,
            period: self.settings.period,
            window,
            max_points: self.settings.max_points,
        };
        self.metrics.query_time_series(&query).await
    }
}

/// Pure classification rule over already-fetched series.
pub fn classify_series(
    utilization: Result<&[f64], &ProviderError>,
    status_checks: Result<&[f64], &ProviderError>,
    failure_value: f64,
) -> HealthStatus {
    let (Ok(utilization), Ok(status_checks)) = (utilization, status_checks) else {
        return HealthStatus::Unknown;
    };

    if utilization.is_empty() {
        return HealthStatus::Unhealthy;
    }
    match status_checks.last() {
        Some(last) if (last - failure_value).abs() < f64::EPSILON => HealthStatus::Unhealthy,
        _ => HealthStatus::Healthy,
    }
}
