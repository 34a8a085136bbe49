//! HTTP control plane.
//!
//! Exposes the monitor's control surface as JSON on localhost. Every
//! response body carries a boolean `success`; failures add a stable `code`
//! and an `error` message.
//!
//! ## Endpoints
//!
//! - `GET    /api/health`
//! - `GET    /api/monitor/status`
//! - `POST   /api/monitor/start`, `POST /api/monitor/stop`
//! - `GET    /api/monitor/config`, `PATCH /api/monitor/config`
//! - `POST   /api/monitor/items` with `{"id": "..."}`
//! - `DELETE /api/monitor/items/{id}`
//! - `POST   /api/monitor/check`
//! - `POST   /api/monitor/items/{id}/check`
//! - `POST   /api/monitor/items/{id}/reset`
//! - `POST   /api/monitor/items/{id}/reextract`
//! - `GET    /api/monitor/items/{id}/changes`

use crate::config::MonitorConfigPatch;
use crate::error::{MonitorError, Result};
use crate::monitor::Monitor;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Body of `POST /api/monitor/items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItemRequest {
    pub id: String,
}

/// Build the control-plane router for `monitor`.
pub fn router(monitor: Monitor) -> Router {
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/monitor/status", get(handle_status))
        .route("/api/monitor/start", post(handle_start))
        .route("/api/monitor/stop", post(handle_stop))
        .route(
            "/api/monitor/config",
            get(handle_get_config).patch(handle_patch_config),
        )
        .route("/api/monitor/items", post(handle_add_item))
        .route("/api/monitor/items/{id}", delete(handle_remove_item))
        .route("/api/monitor/check", post(handle_check_all))
        .route("/api/monitor/items/{id}/check", post(handle_check_item))
        .route("/api/monitor/items/{id}/reset", post(handle_reset_item))
        .route("/api/monitor/items/{id}/reextract", post(handle_reextract))
        .route("/api/monitor/items/{id}/changes", get(handle_changes))
        .with_state(monitor)
}

/// Control-plane HTTP server running in a background task.
pub struct ControlServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ControlServer {
    /// Bind to `bind_addr` (port `0` picks a free port) and start serving.
    ///
    /// # Errors
    /// Returns [`MonitorError::Internal`] if the listener cannot bind.
    pub async fn start(monitor: Monitor, bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| MonitorError::Internal(format!("control server bind failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| MonitorError::Internal(format!("failed to get local addr: {e}")))?;

        info!("control server listening on http://{addr}/api");

        let app = router(monitor);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("control server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn status_for(err: &MonitorError) -> StatusCode {
    match err {
        MonitorError::ConfigValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        MonitorError::UnknownItem(_) => StatusCode::NOT_FOUND,
        MonitorError::InvalidItemId(_) => StatusCode::BAD_REQUEST,
        MonitorError::ItemBusy(_) | MonitorError::SchedulerState(_) => StatusCode::CONFLICT,
        MonitorError::ManualOverrideDisabled => StatusCode::FORBIDDEN,
        MonitorError::Persist(_) | MonitorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: MonitorError) -> Response {
    if !err.is_expected() {
        error!("control operation failed: {err}");
    }
    let body = json!({
        "success": false,
        "code": err.code(),
        "error": err.to_string(),
    });
    (status_for(&err), Json(body)).into_response()
}

fn ok(body: serde_json::Value) -> Response {
    let mut body = body;
    if let Some(map) = body.as_object_mut() {
        map.insert("success".into(), json!(true));
    }
    (StatusCode::OK, Json(body)).into_response()
}

fn not_found(id: &str) -> Response {
    error_response(MonitorError::UnknownItem(id.to_owned()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_health() -> Response {
    ok(json!({ "status": "ok" }))
}

async fn handle_status(State(monitor): State<Monitor>) -> Response {
    match monitor.status() {
        Ok(status) => ok(json!({ "status": status })),
        Err(e) => error_response(e),
    }
}

async fn handle_start(State(monitor): State<Monitor>) -> Response {
    match monitor.start() {
        Ok(()) => ok(json!({ "run_state": monitor.run_state() })),
        Err(e) => error_response(e),
    }
}

async fn handle_stop(State(monitor): State<Monitor>) -> Response {
    match monitor.stop().await {
        Ok(()) => ok(json!({ "run_state": monitor.run_state() })),
        Err(e) => error_response(e),
    }
}

async fn handle_get_config(State(monitor): State<Monitor>) -> Response {
    match monitor.config() {
        Ok(config) => ok(json!({ "config": config })),
        Err(e) => error_response(e),
    }
}

async fn handle_patch_config(
    State(monitor): State<Monitor>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let result =
        MonitorConfigPatch::from_json(body).and_then(|patch| monitor.update_config(&patch));
    match result {
        Ok(config) => ok(json!({ "config": config })),
        Err(e) => error_response(e),
    }
}

async fn handle_add_item(
    State(monitor): State<Monitor>,
    Json(request): Json<AddItemRequest>,
) -> Response {
    match monitor.add_item(&request.id) {
        Ok(true) => ok(json!({ "id": request.id, "added": true })),
        Ok(false) => ok(json!({
            "id": request.id,
            "added": false,
            "message": "already present",
        })),
        Err(e) => error_response(e),
    }
}

async fn handle_remove_item(State(monitor): State<Monitor>, Path(id): Path<String>) -> Response {
    match monitor.remove_item(&id) {
        Ok(true) => ok(json!({ "id": id, "removed": true })),
        Ok(false) => not_found(&id),
        Err(e) => error_response(e),
    }
}

async fn handle_check_all(State(monitor): State<Monitor>) -> Response {
    match monitor.force_check(None).await {
        Ok(reports) => ok(json!({ "reports": reports })),
        Err(e) => error_response(e),
    }
}

async fn handle_check_item(State(monitor): State<Monitor>, Path(id): Path<String>) -> Response {
    match monitor.force_check(Some(&id)).await {
        Ok(reports) => ok(json!({ "reports": reports })),
        Err(e) => error_response(e),
    }
}

async fn handle_reset_item(State(monitor): State<Monitor>, Path(id): Path<String>) -> Response {
    match monitor.reset_item(&id) {
        Ok(true) => ok(json!({ "id": id, "reset": true })),
        Ok(false) => not_found(&id),
        Err(e) => error_response(e),
    }
}

async fn handle_reextract(State(monitor): State<Monitor>, Path(id): Path<String>) -> Response {
    match monitor.force_reextract(&id).await {
        Ok(report) => ok(json!({ "report": report })),
        Err(e) => error_response(e),
    }
}

async fn handle_changes(State(monitor): State<Monitor>, Path(id): Path<String>) -> Response {
    match monitor.item_changes(&id) {
        Ok(changes) => ok(json!({ "changes": changes })),
        Err(e) => error_response(e),
    }
}
