//! Metrics provider client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetmend_core::{MetricsProvider, ProviderFuture, SeriesQuery, Statistic};

use crate::gateway::Gateway;

const QUERY_PATH: &str = "/v1/metrics/query";

#[derive(Serialize)]
struct QueryRequest<'a> {
    instance_id: &'a str,
    metric: &'a str,
    statistic: Statistic,
    period_secs: u64,
    window_secs: u64,
    max_points: u32,
}

/// `values` is required: a reply without it is a failed query, not an empty series.
#[derive(Deserialize)]
struct QueryResponse {
    values: Vec<f64>,
}

/// [`MetricsProvider`] over the HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpMetricsClient {
    gateway: Gateway,
}

impl HttpMetricsClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gateway: Gateway::new(address, timeout),
        }
    }
}

impl MetricsProvider for HttpMetricsClient {
    fn query_time_series<'a>(&'a self, query: &'a SeriesQuery) -> ProviderFuture<'a, Vec<f64>> {
        Box::pin(async move {
            let body = QueryRequest {
                instance_id: &query.instance_id,
                metric: &query.metric,
                statistic: query.statistic,
                period_secs: query.period.as_secs(),
                window_secs: query.window.as_secs(),
                max_points: query.max_points,
            };
            let resp: QueryResponse = self.gateway.post_json(QUERY_PATH, &body).await?;
            Ok(resp.values)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use crate::gateway::tests::serve;

    fn query(instance_id: &str) -> SeriesQuery {
        SeriesQuery {
            instance_id: instance_id.to_string(),
            metric: "CPUUtilization".to_string(),
            statistic: Statistic::Average,
            period: Duration::from_secs(300),
            window: Duration::from_secs(360),
            max_points: 10,
        }
    }

    #[tokio::test]
    async fn query_sends_window_in_seconds() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let router = Router::new()
            .route(
                QUERY_PATH,
                post(
                    |State(seen): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                        *seen.lock().unwrap() = Some(body);
                        Json(json!({ "values": [12.5, 14.0] }))
                    },
                ),
            )
            .with_state(seen.clone());
        let client = HttpMetricsClient::new(serve(router).await, Duration::from_secs(2));

        let values = client.query_time_series(&query("i-1")).await.unwrap();

        assert_eq!(values, vec![12.5, 14.0]);
        assert_eq!(
            seen.lock().unwrap().take().unwrap(),
            json!({
                "instance_id": "i-1",
                "metric": "CPUUtilization",
                "statistic": "Average",
                "period_secs": 300,
                "window_secs": 360,
                "max_points": 10
            })
        );
    }

    #[tokio::test]
    async fn no_datapoints_is_an_empty_series() {
        let router = Router::new().route(QUERY_PATH, post(|| async { Json(json!({ "values": [] })) }));
        let client = HttpMetricsClient::new(serve(router).await, Duration::from_secs(2));

        let values = client.query_time_series(&query("i-1")).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_is_an_error_not_empty() {
        let router = Router::new().route(
            QUERY_PATH,
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "backend down") }),
        );
        let client = HttpMetricsClient::new(serve(router).await, Duration::from_secs(2));

        assert!(client.query_time_series(&query("i-1")).await.is_err());
    }

    #[tokio::test]
    async fn reply_without_values_is_a_decode_error() {
        let router = Router::new().route(QUERY_PATH, post(|| async { Json(json!({ "error": "throttled" })) }));
        let client = HttpMetricsClient::new(serve(router).await, Duration::from_secs(2));

        let err = client.query_time_series(&query("i-1")).await.unwrap_err();
        assert!(matches!(err, fleetmend_core::ProviderError::Decode(_)), "{err:?}");
    }
}
