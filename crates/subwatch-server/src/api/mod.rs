//! HTTP facade over the registry, plus the viewer WebSocket endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use subwatch_core::unix_millis;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::RegistryError;
use crate::fanout::ViewerHub;
use crate::registry::ChainRegistry;

mod chains;
mod health;
mod ws;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChainRegistry>,
    pub hub: Arc<ViewerHub>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<ChainRegistry>, hub: Arc<ViewerHub>) -> Self {
        Self {
            registry,
            hub,
            started_at: Instant::now(),
        }
    }
}

/// JSON envelope of every HTTP response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: unix_millis(),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: unix_millis(),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(m) | ApiError::NotFound(m) | ApiError::Internal(m) => m,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidEndpoint(_) => ApiError::BadRequest(err.to_string()),
            RegistryError::NotFound(_) => ApiError::NotFound("Chain not found".to_string()),
            RegistryError::ConnectTimeout(_) | RegistryError::ConnectionRefused(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiResponse::failure(self.message()))).into_response()
    }
}

/// Build the application router.
///
/// `cors_origin` restricts cross-origin requests to one origin; `None`
/// allows any.
pub fn router(state: AppState, cors_origin: Option<&str>) -> Router {
    let cors = match cors_origin.and_then(|o| o.parse::<HeaderValue>().ok()) {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/api/health", get(health::service_health))
        .route("/api/chains", get(chains::list_chains))
        .route("/api/chains/connect", post(chains::connect_chain))
        .route(
            "/api/chains/{id}",
            get(chains::get_chain).delete(chains::disconnect_chain),
        )
        .route("/api/chains/{id}/stats", get(chains::get_stats))
        .route("/api/chains/{id}/blocks", get(chains::get_blocks))
        .route("/api/chains/{id}/reconnect", post(chains::reconnect_chain))
        .route("/api/chains/{id}/health", get(health::chain_health))
        .route("/api/chains/{id}/validators", get(chains::get_validators))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
