//! HTTP surface for the Loopcast daemon
//!
//! Exposes session control, status, and the live event stream under
//! `/live`. The surrounding UI is a separate concern; this API only speaks
//! JSON and SSE.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::coordinator::{Coordinator, CoordinatorError, StartSessionRequest};
use crate::events::EventBus;
use crate::platform::BroadcastPlatform;
use crate::supervisor::SupervisorError;

/// Errors that can occur when running the API server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub bus: EventBus,
    pub platform: Arc<dyn BroadcastPlatform>,
}

/// Handler for POST /live/start
///
/// Accepts a loose JSON body so a missing source path maps to a clean 400
/// rather than a deserialization rejection.
async fn post_start(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let request: StartSessionRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": format!("Invalid request: {}", e) })),
            );
        }
    };

    match state.coordinator.start(request).await {
        Ok(started) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "session_id": started.session_id,
                "broadcast_id": started.broadcast_id,
                "ingest_url": started.ingest_url,
            })),
        ),
        Err(e) => {
            let status = match &e {
                CoordinatorError::SessionBusy
                | CoordinatorError::EncoderStart(SupervisorError::AlreadyRunning) => {
                    StatusCode::CONFLICT
                }
                CoordinatorError::SourceNotFound(_) => StatusCode::BAD_REQUEST,
                CoordinatorError::ProvisioningFailed(_) | CoordinatorError::ThumbnailFailed(_) => {
                    StatusCode::BAD_GATEWAY
                }
                CoordinatorError::EncoderStart(SupervisorError::Spawn(_)) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(json!({ "ok": false, "error": e.to_string() })))
        }
    }
}

/// Handler for POST /live/stop
async fn post_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stopped = state.coordinator.stop().await;
    Json(json!({ "ok": true, "stopped": stopped }))
}

/// Handler for GET /live/status
async fn get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.coordinator.status().await;
    Json(serde_json::to_value(status).unwrap_or_else(|_| json!({})))
}

/// Handler for GET /live/events
///
/// Streams status events as SSE. Subscription is forward-only; a slow
/// consumer that lags simply misses the dropped events.
async fn get_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default()
                .event(event.kind())
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}

/// Handler for GET /live/broadcasts
async fn get_broadcasts(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.platform.list_broadcasts().await {
        Ok(broadcasts) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "broadcasts": broadcasts })),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "ok": false, "error": e.to_string() })),
        ),
    }
}

/// Handler for GET /live/categories
async fn get_categories(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.platform.list_categories().await {
        Ok(categories) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "categories": categories })),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "ok": false, "error": e.to_string() })),
        ),
    }
}

/// Handler for POST /live/cleanup
async fn post_cleanup(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.coordinator.staging().clear().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": e.to_string() })),
        ),
    }
}

/// Creates the axum Router with all live-session endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/live/start", post(post_start))
        .route("/live/stop", post(post_stop))
        .route("/live/status", get(get_status))
        .route("/live/events", get(get_events))
        .route("/live/broadcasts", get(get_broadcasts))
        .route("/live/categories", get(get_categories))
        .route("/live/cleanup", post(post_cleanup))
        .with_state(state)
}

/// Runs the API server on 127.0.0.1 at the given port
pub async fn run_server(state: AppState, port: u16) -> Result<(), ServerError> {
    let app = create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await.map_err(ServerError::BindError)?;

    Ok(())
}
