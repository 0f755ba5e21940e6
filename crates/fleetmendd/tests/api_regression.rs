//! Daemon-level regression tests.
//!
//! Drives the assembled router with in-memory doubles: operator actions,
//! alarm delivery, stop notifications, and a sweep sharing the same
//! controller and record store.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use fleetmend_api::build_router;
use fleetmend_controller::{ControllerSettings, RemediationController, SweepSettings, Sweeper};
use fleetmend_core::testing::{FakeCompute, FakeMetrics};
use fleetmend_core::{InstanceFilter, InstanceState};
use fleetmend_health::{EvaluatorSettings, HealthEvaluator};
use fleetmend_state::{RecordStore, StateStore};

struct Daemon {
    router: Router,
    controller: Arc<RemediationController>,
    compute: Arc<FakeCompute>,
    store: Arc<StateStore>,
}

fn daemon(max_pending: usize, running: &[&str]) -> Daemon {
    let compute = Arc::new(FakeCompute::new());
    for id in running {
        compute.add_instance(id, InstanceState::Running, "Environment", "production");
    }
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let controller = Arc::new(RemediationController::new(
        compute.clone(),
        store.clone(),
        ControllerSettings {
            max_pending,
            pending_ttl: Duration::from_secs(7200),
        },
    ));
    Daemon {
        router: build_router(controller.clone()),
        controller,
        compute,
        store,
    }
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn alarm_for(id: &str) -> String {
    let message = serde_json::json!({
        "AlarmName": format!("{id}-cpu-absent"),
        "NewStateValue": "ALARM",
        "Trigger": { "Dimensions": [{ "name": "InstanceId", "value": id }] }
    })
    .to_string();
    serde_json::json!({ "Records": [{ "Sns": { "Message": message } }] }).to_string()
}

fn stopped_event(id: &str) -> String {
    serde_json::json!({
        "detail-type": "EC2 Instance State-change Notification",
        "detail": { "instance-id": id, "state": "stopped" }
    })
    .to_string()
}

#[tokio::test]
async fn healthz_responds() {
    let d = daemon(2, &[]);
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();

    let (status, json) = send(&d.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"], "ok");
}

#[tokio::test]
async fn alarm_then_stop_notification_completes_cycle() {
    let d = daemon(2, &["i-1"]);

    let (status, json) = send(&d.router, post("/api/v1/events/alarm", alarm_for("i-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["outcome"], "initiated");

    let req = Request::builder().uri("/api/v1/abnormal").body(Body::empty()).unwrap();
    let (_, json) = send(&d.router, req).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"][0]["trigger"], "alarm");
    assert!(json["data"][0]["last_alarm_at"].is_u64());

    let (status, json) = send(&d.router, post("/api/v1/events/state-change", stopped_event("i-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["restart"], "restarted");

    assert_eq!(d.compute.started_ids(), vec!["i-1"]);
    assert!(d.store.list_records().unwrap().is_empty());
    assert_eq!(d.compute.state_of("i-1"), Some(InstanceState::Running));
}

#[tokio::test]
async fn repeated_alarms_stop_once() {
    let d = daemon(2, &["i-1"]);

    send(&d.router, post("/api/v1/events/alarm", alarm_for("i-1"))).await;
    let (_, json) = send(&d.router, post("/api/v1/events/alarm", alarm_for("i-1"))).await;

    assert_eq!(json["data"]["outcome"], "already_pending");
    assert_eq!(d.compute.stopped_ids(), vec!["i-1"]);
}

#[tokio::test]
async fn alarm_beyond_cap_is_suppressed() {
    let d = daemon(1, &["i-1", "i-2"]);

    send(&d.router, post("/api/v1/events/alarm", alarm_for("i-1"))).await;
    let (status, json) = send(&d.router, post("/api/v1/events/alarm", alarm_for("i-2"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["outcome"], "suppressed");
    assert_eq!(json["data"]["reason"], "concurrency_cap");
    assert_eq!(d.compute.stopped_ids(), vec!["i-1"]);
    assert_eq!(d.store.count_pending().unwrap(), 1);
}

#[tokio::test]
async fn manual_force_stop_bypasses_cap() {
    let d = daemon(1, &["i-1", "i-2"]);

    let (status, json) = send(
        &d.router,
        post("/api/v1/instances/i-1;i-2/force-stop-and-start", Body::empty()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["stopped"], serde_json::json!(["i-1", "i-2"]));
    assert_eq!(d.store.count_pending().unwrap(), 2);
}

#[tokio::test]
async fn manual_reboot_does_not_track_state() {
    let d = daemon(2, &["i-1", "i-2"]);

    let (status, _) = send(&d.router, post("/api/v1/instances/i-1;i-2/reboot", Body::empty())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(d.compute.rebooted_ids(), vec!["i-1", "i-2"]);
    assert!(d.store.list_records().unwrap().is_empty());
}

#[tokio::test]
async fn empty_id_list_is_rejected_before_provider_calls() {
    let d = daemon(2, &["i-1"]);

    let (status, json) = send(&d.router, post("/api/v1/instances/;/reboot", Body::empty())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (status, _) = send(
        &d.router,
        post("/api/v1/instances/;/force-stop-and-start", Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(d.compute.calls().is_empty());
}

#[tokio::test]
async fn operator_stop_is_never_restarted() {
    let d = daemon(2, &["i-1"]);
    d.compute.set_state("i-1", InstanceState::Stopped);

    let (status, json) = send(&d.router, post("/api/v1/events/state-change", stopped_event("i-1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["restart"], "not_system_initiated");
    assert!(d.compute.started_ids().is_empty());
}

#[tokio::test]
async fn malformed_payloads_are_bad_requests() {
    let d = daemon(2, &[]);

    let (status, _) = send(&d.router, post("/api/v1/events/alarm", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&d.router, post("/api/v1/events/state-change", "[]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sweep_and_api_share_the_cap() {
    let d = daemon(2, &["i-1", "i-2", "i-3"]);

    // Operator takes one slot; the instance is still shutting down.
    send(&d.router, post("/api/v1/instances/i-1/force-stop-and-start", Body::empty())).await;
    d.compute.set_state("i-1", InstanceState::Stopping);

    // The remaining instances report no utilization.
    let metrics = Arc::new(FakeMetrics::new());
    let evaluator = Arc::new(HealthEvaluator::new(metrics, EvaluatorSettings::default()));
    let sweeper = Sweeper::new(
        d.controller.clone(),
        evaluator,
        d.compute.clone(),
        SweepSettings {
            filter: InstanceFilter {
                tag_key: "Environment".to_string(),
                tag_value: "production".to_string(),
                page_size: 100,
            },
            concurrency: 4,
        },
    );

    let report = sweeper.sweep_once().await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.restarted, 0);
    assert_eq!(report.initiated, 1);
    assert!(report.cap_reached);
    assert_eq!(d.compute.stopped_ids(), vec!["i-1", "i-2"]);
    assert_eq!(d.store.count_pending().unwrap(), 2);
}
