//! REST API handlers.
//!
//! Each handler calls into `RemediationController` and wraps the result in
//! the common JSON envelope.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{info, warn};

use fleetmend_controller::{
    AlarmNotification, ControllerError, ManualReport, RestartOutcome, StateChangeEvent,
};
use fleetmend_core::{InstanceId, InstanceState, epoch_millis};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Epoch milliseconds.
    timestamp: u64,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: epoch_millis(),
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            timestamp: epoch_millis(),
        }),
    )
        .into_response()
}

/// Status code for a controller error.
fn status_for(err: &ControllerError) -> StatusCode {
    match err {
        ControllerError::InvalidParameter(_) | ControllerError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
        ControllerError::Provider(_) => StatusCode::BAD_GATEWAY,
        ControllerError::State(_) | ControllerError::UntrackedStop { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Provider payloads are logged, never returned to the caller.
fn controller_error(err: ControllerError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, %status, "request failed");
    }
    match err {
        ControllerError::Provider(_) => error_response("compute provider call failed", status),
        err => error_response(&err.to_string(), status),
    }
}

/// Split a `;`-separated id list. Empty segments are dropped.
fn split_ids(raw: &str) -> Vec<InstanceId> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Queries ────────────────────────────────────────────────────

/// GET /api/v1/abnormal
pub async fn list_abnormal(State(state): State<ApiState>) -> Response {
    match state.controller.list_abnormal() {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => controller_error(e),
    }
}

/// GET /healthz
pub async fn healthz() -> Response {
    ApiResponse::ok("ok").into_response()
}

// ── Manual operations ──────────────────────────────────────────

/// POST /api/v1/instances/{ids}/reboot
pub async fn reboot(State(state): State<ApiState>, Path(ids): Path<String>) -> Response {
    let ids = split_ids(&ids);
    match state.controller.reboot(&ids).await {
        Ok(()) => ApiResponse::ok(ids).into_response(),
        Err(e) => controller_error(e),
    }
}

/// POST /api/v1/instances/{ids}/force-stop-and-start
///
/// Returns 502 with the per-instance report if any instance failed.
pub async fn force_stop_and_start(State(state): State<ApiState>, Path(ids): Path<String>) -> Response {
    let ids = split_ids(&ids);
    match state.controller.force_stop_and_start(&ids).await {
        Ok(report) if report.failed.is_empty() => ApiResponse::ok(report).into_response(),
        Ok(report) => partial_failure(report),
        Err(e) => controller_error(e),
    }
}

fn partial_failure(report: ManualReport) -> Response {
    let error = format!(
        "{} of {} instances failed",
        report.failed.len(),
        report.failed.len() + report.stopped.len()
    );
    (
        StatusCode::BAD_GATEWAY,
        Json(ApiResponse {
            success: false,
            data: Some(report),
            error: Some(error),
            timestamp: epoch_millis(),
        }),
    )
        .into_response()
}

// ── Trigger delivery ───────────────────────────────────────────

/// POST /api/v1/events/alarm
///
/// Body is the raw notification; both the enveloped and the bare alarm
/// formats are accepted.
pub async fn alarm(State(state): State<ApiState>, body: Bytes) -> Response {
    let alarm = match AlarmNotification::parse(&body) {
        Ok(alarm) => alarm,
        Err(e) => return controller_error(e),
    };
    match state.controller.on_alarm(&alarm).await {
        Ok(outcome) => {
            info!(instance_id = %alarm.instance_id, ?outcome, "alarm handled");
            ApiResponse::ok(outcome).into_response()
        }
        Err(e) => controller_error(e),
    }
}

#[derive(Serialize)]
struct StateChangeAck {
    instance_id: InstanceId,
    state: InstanceState,
    /// `None` when the state was not `stopped`.
    restart: Option<RestartOutcome>,
}

/// POST /api/v1/events/state-change
pub async fn state_change(State(state): State<ApiState>, body: Bytes) -> Response {
    let event = match StateChangeEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => return controller_error(e),
    };
    match state.controller.on_state_change(&event).await {
        Ok(restart) => ApiResponse::ok(StateChangeAck {
            instance_id: event.detail.instance_id,
            state: event.detail.state,
            restart,
        })
        .into_response(),
        Err(e) => controller_error(e),
    }
}
