use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::dataset::Progress;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub session: Option<SessionHealth>,
}

#[derive(Serialize)]
pub struct SessionHealth {
    pub id: uuid::Uuid,
    pub backend: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub file_id: Option<String>,
    pub progress: Option<Progress>,
}

/// GET /health — liveness plus a summary of the active session.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let slot = state.session.lock().await;
    let session = slot.as_ref().map(|s| SessionHealth {
        id: s.id(),
        backend: s.backend_name().to_string(),
        started_at: s.started_at(),
        file_id: s.selected().map(|f| f.id.clone()),
        progress: s.progress().ok(),
    });

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session,
    })
}
