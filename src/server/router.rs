use std::convert::Infallible;
use std::time::Duration;

use action_flow::{PickerResult, SupervisorError};
use async_stream::stream;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use flow_model::{sanitize, Flow};
use flowpilot_core_types::RequestId;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use super::state::ServeState;

type ApiError = (StatusCode, Json<Value>);

pub fn build_router(state: ServeState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/run", post(run_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/state", get(state_handler))
        .route("/api/step", post(step_handler))
        .route("/api/events", get(events_handler))
        .route("/api/picker/start", post(picker_start_handler))
        .route("/api/picker/result", post(picker_result_handler))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

async fn health_handler(State(state): State<ServeState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "running": state.supervisor.is_running(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    /// Inline flow document; the configured flow runs when absent.
    #[serde(default)]
    flow: Option<Value>,
}

async fn run_handler(
    State(state): State<ServeState>,
    payload: Option<Json<RunRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let started = match request.flow {
        Some(raw) => {
            let report = Flow::from_value(&raw).map_err(|err| bad_request(&err.to_string()))?;
            if report.dropped > 0 {
                warn!(dropped = report.dropped, "inline flow contained invalid steps");
            }
            state.supervisor.start(report.flow, state.surface.clone())
        }
        None => state.supervisor.start_active(state.surface.clone()),
    };
    let handle = started.map_err(supervisor_error)?;
    info!(run_id = %handle.run_id, "run started over HTTP");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "runId": handle.run_id,
        })),
    ))
}

async fn stop_handler(State(state): State<ServeState>) -> Json<Value> {
    let stopping = state.supervisor.request_stop();
    Json(json!({
        "success": true,
        "stopping": stopping,
    }))
}

async fn state_handler(State(state): State<ServeState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "state": state.supervisor.query_state(),
    }))
}

#[derive(Debug, Deserialize)]
struct StepRequest {
    step: Value,
    #[serde(default)]
    index: usize,
}

async fn step_handler(
    State(state): State<ServeState>,
    Json(request): Json<StepRequest>,
) -> Result<Json<Value>, ApiError> {
    let step = sanitize(&request.step).ok_or_else(|| bad_request("invalid step"))?;
    let report = state
        .supervisor
        .run_single_step(step, request.index, state.surface.clone())
        .await
        .map_err(supervisor_error)?;
    Ok(Json(json!({
        "success": report.last_error.is_none(),
        "report": report,
    })))
}

async fn events_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let mut receiver = state.supervisor.reporter().subscribe();
    let snapshot = state.supervisor.query_state().mirror;
    let stream = stream! {
        if let Ok(event) = Event::default().event("snapshot").json_data(&snapshot) {
            yield Ok::<Event, Infallible>(event);
        }
        loop {
            match receiver.recv().await {
                Ok(progress) => {
                    match Event::default().event(progress.kind()).json_data(&progress) {
                        Ok(event) => yield Ok(event),
                        Err(err) => warn!(%err, "failed to encode progress event"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PickerStartRequest {
    tab: String,
    #[serde(default)]
    request_id: Option<RequestId>,
}

async fn picker_start_handler(
    State(state): State<ServeState>,
    Json(request): Json<PickerStartRequest>,
) -> Json<Value> {
    let request_id = request.request_id.unwrap_or_default();
    let session = state.supervisor.start_picker(request.tab, request_id);
    Json(json!({
        "success": true,
        "session": session,
    }))
}

async fn picker_result_handler(
    State(state): State<ServeState>,
    Json(result): Json<PickerResult>,
) -> Json<Value> {
    let matched = state.supervisor.finish_picker(result);
    Json(json!({
        "success": true,
        "matched": matched,
    }))
}

fn supervisor_error(err: SupervisorError) -> ApiError {
    let status = match err {
        SupervisorError::AlreadyRunning => StatusCode::CONFLICT,
        SupervisorError::StepOutOfRange(_) => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(json!({
            "success": false,
            "error": err.to_string(),
        })),
    )
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "error": message,
        })),
    )
}
