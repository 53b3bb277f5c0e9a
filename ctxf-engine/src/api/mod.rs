//! Read-only HTTP surface
//!
//! Exposes the field store views and lab score history as JSON. There are
//! no write endpoints: proposals and reviews stay library calls.

mod fields;
mod health;
mod quality;

pub use fields::field_routes;
pub use health::health_routes;
pub use quality::quality_routes;

use crate::error::EngineError;
use crate::quality::QualityTracker;
use crate::store::FieldStore;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FieldStore>,
    pub quality: Arc<QualityTracker>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: Arc<FieldStore>, quality: Arc<QualityTracker>) -> Self {
        Self {
            store,
            quality,
            startup_time: Utc::now(),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Engine failure; mapped by kind
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Engine(err) => match err {
                EngineError::FieldNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
                }
                EngineError::ConcurrentModification { .. } => {
                    (StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
                EngineError::NotHumanSource(_) => {
                    (StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string())
                }
                EngineError::Store(_) => {
                    error!("Store failure while serving request: {}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", err.to_string())
                }
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(field_routes())
        .merge(quality_routes())
        .merge(health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
