pub mod annotate;
pub mod auth;
pub mod health;
pub mod metrics;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::models::dataset::DatasetError;
use crate::services::storage::StorageError;
use crate::session::{Session, SessionError};

/// Session-facing routes. The Prometheus endpoint is mounted separately
/// because it carries its own state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Static UI (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../../static/index.html")) }))
        .route("/health", get(health::health_check))
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", post(auth::logout))
        .route("/api/v1/files", get(annotate::list_files))
        .route("/api/v1/files/select", post(annotate::select_file))
        .route("/api/v1/files/load", post(annotate::load_file))
        .route("/api/v1/annotate", get(annotate::current))
        .route("/api/v1/label", post(annotate::label))
        .route("/api/v1/notifications", get(annotate::notifications))
        .route("/api/v1/history", get(annotate::history))
        .with_state(state)
}

/// JSON error body `{ "error": message }` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Not logged in")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let status = match &e {
            SessionError::NoFileSelected | SessionError::NoDatasetLoaded => StatusCode::CONFLICT,
            SessionError::AnnotationComplete | SessionError::SessionChanged => StatusCode::CONFLICT,
            SessionError::InvalidFileReference(_) => StatusCode::BAD_REQUEST,
            SessionError::Dataset(DatasetError::Parse(_)) => StatusCode::BAD_REQUEST,
            SessionError::Dataset(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::Storage(StorageError::AuthExpired) => StatusCode::UNAUTHORIZED,
            SessionError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            SessionError::Storage(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "Request failed");
        }
        Self::new(status, e.to_string())
    }
}

/// Convert a session error, tearing the session down when the storage
/// credentials are no longer valid.
pub(crate) fn session_failure(slot: &mut Option<Session>, e: SessionError) -> ApiError {
    if matches!(e, SessionError::Storage(StorageError::AuthExpired)) {
        if let Some(expired) = slot.take() {
            tracing::warn!(session_id = %expired.id(), "Storage credentials expired, session ended");
        }
    }
    ApiError::from(e)
}
