//! fleetmend-api — REST API for FleetMend.
//!
//! Operator actions and trigger delivery over HTTP. Every response uses
//! the envelope `{success, data?, error?, timestamp}`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/abnormal` | Instances with a remediation in flight |
//! | POST | `/api/v1/instances/{ids}/reboot` | Reboot `;`-separated instances |
//! | POST | `/api/v1/instances/{ids}/force-stop-and-start` | Manual remediation (cap ignored) |
//! | POST | `/api/v1/events/alarm` | Anomaly alarm delivery |
//! | POST | `/api/v1/events/state-change` | Instance state-change delivery |
//! | GET | `/healthz` | Liveness |
//!
//! Parameter errors map to 400, provider failures to 502 and record store
//! failures to 500.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fleetmend_controller::RemediationController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<RemediationController>,
}

/// Build the complete API router.
pub fn build_router(controller: Arc<RemediationController>) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route("/abnormal", get(handlers::list_abnormal))
        .route("/instances/{ids}/reboot", post(handlers::reboot))
        .route(
            "/instances/{ids}/force-stop-and-start",
            post(handlers::force_stop_and_start),
        )
        .route("/events/alarm", post(handlers::alarm))
        .route("/events/state-change", post(handlers::state_change))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
