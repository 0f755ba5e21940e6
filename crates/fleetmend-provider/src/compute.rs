//! Compute control-plane client.

use std::time::Duration;

use serde::Serialize;
use serde::de::IgnoredAny;
use tracing::debug;

use fleetmend_core::{
    ComputeControlPlane, InstanceFilter, InstanceId, InstancePage, InstanceState, InstanceSummary,
    ProviderError, ProviderFuture,
};

use crate::gateway::Gateway;

const DESCRIBE_PATH: &str = "/v1/instances/describe";
const STOP_PATH: &str = "/v1/instances/stop";
const START_PATH: &str = "/v1/instances/start";
const REBOOT_PATH: &str = "/v1/instances/reboot";

#[derive(Serialize)]
struct DescribeByFilter<'a> {
    tag_key: &'a str,
    tag_value: &'a str,
    states: [InstanceState; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    max_results: u32,
}

#[derive(Serialize)]
struct Ids<'a> {
    ids: &'a [InstanceId],
}

#[derive(Serialize)]
struct Stop<'a> {
    ids: &'a [InstanceId],
    force: bool,
}

/// [`ComputeControlPlane`] over the HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpComputeClient {
    gateway: Gateway,
}

impl HttpComputeClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gateway: Gateway::new(address, timeout),
        }
    }

    async fn action(
        &self,
        path: &str,
        ids: &[InstanceId],
        body: &(impl Serialize + Sync),
    ) -> Result<(), ProviderError> {
        let _: IgnoredAny = self.gateway.post_json(path, body).await?;
        debug!(%path, count = ids.len(), "instance action accepted");
        Ok(())
    }
}

impl ComputeControlPlane for HttpComputeClient {
    fn describe_running_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
        next_token: Option<&'a str>,
    ) -> ProviderFuture<'a, InstancePage> {
        Box::pin(async move {
            let body = DescribeByFilter {
                tag_key: &filter.tag_key,
                tag_value: &filter.tag_value,
                states: [InstanceState::Running],
                next_token,
                max_results: filter.page_size,
            };
            self.gateway.post_json(DESCRIBE_PATH, &body).await
        })
    }

    fn describe_instances<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, Vec<InstanceSummary>> {
        Box::pin(async move {
            let page: InstancePage = self.gateway.post_json(DESCRIBE_PATH, &Ids { ids }).await?;
            Ok(page.instances)
        })
    }

    fn force_stop<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()> {
        Box::pin(async move { self.action(STOP_PATH, ids, &Stop { ids, force: true }).await })
    }

    fn start<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()> {
        Box::pin(async move { self.action(START_PATH, ids, &Ids { ids }).await })
    }

    fn reboot<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()> {
        Box::pin(async move { self.action(REBOOT_PATH, ids, &Ids { ids }).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use crate::gateway::tests::serve;

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    fn record(seen: &Seen, path: &str, body: Value) {
        seen.lock().unwrap().push((path.to_string(), body));
    }

    /// Two pages of running instances; `i-9` is stopped for id lookups.
    async fn stub() -> (HttpComputeClient, Seen) {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route(
                DESCRIBE_PATH,
                post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    record(&seen, DESCRIBE_PATH, body.clone());
                    if body.get("ids").is_some() {
                        return Json(json!({ "instances": [{ "id": "i-9", "state": "stopped" }] }));
                    }
                    match body["next_token"].as_str() {
                        None => Json(json!({
                            "instances": [{ "id": "i-1", "state": "running" }],
                            "next_token": "p2"
                        })),
                        Some(_) => Json(json!({ "instances": [{ "id": "i-2", "state": "running" }] })),
                    }
                }),
            )
            .route(
                STOP_PATH,
                post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    record(&seen, STOP_PATH, body);
                    StatusCode::NO_CONTENT
                }),
            )
            .route(
                START_PATH,
                post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    record(&seen, START_PATH, body);
                    Json(json!({ "accepted": true }))
                }),
            )
            .route(
                REBOOT_PATH,
                post(|| async { (StatusCode::BAD_REQUEST, "IncorrectInstanceState") }),
            )
            .with_state(seen.clone());

        let addr = serve(router).await;
        (HttpComputeClient::new(addr, Duration::from_secs(2)), seen)
    }

    fn filter() -> InstanceFilter {
        InstanceFilter {
            tag_key: "Environment".to_string(),
            tag_value: "production".to_string(),
            page_size: 50,
        }
    }

    #[tokio::test]
    async fn describe_running_sends_filter_and_token() {
        let (client, seen) = stub().await;
        let f = filter();

        let first = client.describe_running_instances(&f, None).await.unwrap();
        assert_eq!(first.instances[0].id, "i-1");
        assert_eq!(first.next_token.as_deref(), Some("p2"));

        let second = client.describe_running_instances(&f, Some("p2")).await.unwrap();
        assert_eq!(second.instances[0].id, "i-2");
        assert!(second.next_token.is_none());

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0].1,
            json!({
                "tag_key": "Environment",
                "tag_value": "production",
                "states": ["running"],
                "max_results": 50
            })
        );
        assert_eq!(seen[1].1["next_token"], "p2");
    }

    #[tokio::test]
    async fn describe_by_id_returns_states() {
        let (client, _) = stub().await;
        let ids = vec!["i-9".to_string()];

        let described = client.describe_instances(&ids).await.unwrap();

        assert_eq!(
            described,
            vec![InstanceSummary {
                id: "i-9".to_string(),
                state: InstanceState::Stopped
            }]
        );
    }

    #[tokio::test]
    async fn force_stop_sets_force_flag() {
        let (client, seen) = stub().await;
        let ids = vec!["i-1".to_string(), "i-2".to_string()];

        client.force_stop(&ids).await.unwrap();
        client.start(&ids[..1]).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (STOP_PATH.to_string(), json!({ "ids": ["i-1", "i-2"], "force": true })));
        assert_eq!(seen[1], (START_PATH.to_string(), json!({ "ids": ["i-1"] })));
    }

    #[tokio::test]
    async fn rejected_reboot_surfaces_api_error() {
        let (client, _) = stub().await;

        let err = client.reboot(&["i-1".to_string()]).await.unwrap_err();

        assert_eq!(
            err,
            ProviderError::Api {
                status: 400,
                message: "IncorrectInstanceState".to_string()
            }
        );
    }
}
