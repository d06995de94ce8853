//! HTTP inbound layer.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use kiln_core::{Artifact, Error};
use kiln_manifests::BakeService;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::wiring::Bakery;

#[derive(Clone)]
pub struct AppState {
    bakery: Arc<Bakery>,
}

/// Build the service router.
#[must_use]
pub fn router(bakery: Arc<Bakery>) -> Router {
    Router::new()
        .route("/api/v2/manifest/bake/:renderer_type", post(bake))
        .route("/health", get(health))
        .with_state(AppState { bakery })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "UP",
        "runningBakes": state.bakery.running_job_count(),
    }))
}

async fn bake(
    State(state): State<AppState>,
    Path(renderer_type): Path<String>,
    Json(request): Json<serde_json::Value>,
) -> Result<Json<Artifact>, ApiError> {
    let service = state
        .bakery
        .registry
        .service_for(&renderer_type)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("no bake service handles renderer type '{renderer_type}'"),
            )
        })?
        .clone();

    // The bake runs in its own task so a dropped connection interrupts it
    // through the token (which cancels the backend job) instead of silently
    // abandoning it mid-poll
    let cancel = CancellationToken::new();
    let bake_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { service.bake(request, &cancel).await }
    });
    let _cancel_on_disconnect = cancel.clone().drop_guard();

    let result = bake_task
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match result {
        Ok(artifact) => Ok(Json(artifact)),
        Err(error) => Err(ApiError::from(error)),
    }
}

/// JSON error responses with the right status per error class.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = if error.is_invalid_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "bake failed");
        } else {
            tracing::warn!(status = %self.status, message = %self.message, "bake rejected");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
