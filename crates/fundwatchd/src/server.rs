use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use fundwatch_core::Secret;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::daemon::summary;
use crate::persist::Persistor;
use crate::pipeline::Trigger;
use crate::scheduler::{RunQueue, SharedState, SubmitError};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub queue: RunQueue,
    pub scheduler: SharedState,
    pub persistor: Persistor,
    pub api_key: Option<Secret>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An update is already queued, try again later")]
    QueueFull,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerParams {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

/// Update routes, served at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/update-data", post(trigger_update))
        .route("/update-status", get(update_status))
        .route("/health", get(health));

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn trigger_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> Result<Json<Value>, ApiError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .or(params.api_key.as_deref());

    let authorized = match (&state.api_key, presented) {
        (Some(expected), Some(candidate)) => expected.matches(candidate),
        _ => false,
    };
    if !authorized {
        tracing::warn!(key_present = presented.is_some(), "rejected update trigger");
        return Err(ApiError::Unauthorized);
    }

    state.queue.submit(Trigger::Manual).map_err(|err| match err {
        SubmitError::QueueFull => ApiError::QueueFull,
        SubmitError::Closed => ApiError::Internal(err.to_string()),
    })?;

    Ok(Json(json!({
        "status": "started",
        "message": "Data update started in background",
        "timestamp": Utc::now(),
    })))
}

async fn update_status(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (running, last_run) = {
        let scheduler = state.scheduler.read().await;
        (scheduler.is_running(), scheduler.last_result.clone())
    };

    let persistor = state.persistor.clone();
    let snapshot = tokio::task::spawn_blocking(move || persistor.load_current())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let Some(snapshot) = snapshot else {
        let body = json!({
            "error": "No data file found",
            "running": running,
            "lastRun": last_run,
        });
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    };

    let mut body = summary(&snapshot);
    body["running"] = json!(running);
    body["lastRun"] = json!(last_run);
    Ok(Json(body).into_response())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
