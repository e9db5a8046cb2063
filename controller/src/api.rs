use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use homectl_common::{ControllerStatus, DriverInput, Notification};

use crate::host::AppState;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(rename = "knownEntities")]
    known_entities: usize,
    controllers: Vec<ControllerStatus>,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/controllers/{name}", get(handle_get_controller))
        .route(
            "/api/controllers/{name}/reconcile",
            post(handle_post_reconcile),
        )
        .route("/api/notify", post(handle_post_notify))
        .with_state(app_state)
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut controllers = Vec::with_capacity(state.controllers.len());
    for (name, handle) in state.controllers.iter() {
        match handle.status().await {
            Some(status) => controllers.push(status),
            None => warn!("{name}: {} controller status unavailable", handle.kind.as_str()),
        }
    }

    Json(StatusResponse {
        known_entities: state.store.entity_count(),
        controllers,
    })
}

async fn handle_get_controller(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = state.controllers.get(&name) else {
        return error_response(StatusCode::NOT_FOUND, "Unknown controller");
    };

    match handle.status().await {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "Controller not running"),
    }
}

async fn handle_post_reconcile(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = state.controllers.get(&name) else {
        return error_response(StatusCode::NOT_FOUND, "Unknown controller");
    };

    info!("{name}: reconcile requested over http");
    if !handle.send(DriverInput::Reconcile).await {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Controller not running");
    }

    // Status is answered after the reconcile since the queue is ordered.
    match handle.status().await {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "Controller not running"),
    }
}

async fn handle_post_notify(
    State(state): State<AppState>,
    Json(notification): Json<Notification>,
) -> impl IntoResponse {
    if notification.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'message'");
    }

    match state.notify(&notification) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            warn!("notification failed: {err}");
            error_response(StatusCode::BAD_GATEWAY, "Failed to publish notification")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
