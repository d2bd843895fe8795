use axum::extract::State;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::dataset::{FileRef, Progress};
use crate::models::label::Label;
use crate::routes::{session_failure, ApiError};
use crate::services::storage::RemoteFile;
use crate::services::sync::{SyncFailure, SyncNotice, SyncOutcome};
use crate::session::{LabelEvent, LabelReceipt, RecordView, Session, SessionError};

#[derive(Debug, Deserialize, Validate)]
pub struct SelectFileRequest {
    /// File id or share link
    #[garde(length(min = 1, max = 2048))]
    pub file: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LabelRequest {
    /// 1 = AI job, 0 = non-AI job
    #[garde(range(min = 0, max = 1))]
    pub value: u8,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<RemoteFile>,
    pub selected: Option<FileRef>,
}

#[derive(Debug, Serialize)]
pub struct SelectFileResponse {
    pub selected: FileRef,
}

#[derive(Debug, Serialize)]
pub struct AnnotateResponse {
    pub file: FileRef,
    pub progress: Progress,
    pub current: Option<RecordView>,
    pub complete: bool,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub message: String,
    pub notice: SyncNotice,
}

/// GET /api/v1/files — CSV files visible to the session.
pub async fn list_files(State(state): State<AppState>) -> Result<Json<FileListResponse>, ApiError> {
    let mut slot = state.session.lock().await;
    let session = slot.as_mut().ok_or_else(ApiError::unauthenticated)?;

    match session.list_files().await {
        Ok(files) => Ok(Json(FileListResponse {
            files,
            selected: session.selected().cloned(),
        })),
        Err(e) => Err(session_failure(&mut slot, e)),
    }
}

/// POST /api/v1/files/select — choose a file by id or share link.
pub async fn select_file(
    State(state): State<AppState>,
    Json(request): Json<SelectFileRequest>,
) -> Result<Json<SelectFileResponse>, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut slot = state.session.lock().await;
    let session = slot.as_mut().ok_or_else(ApiError::unauthenticated)?;
    let selected = session.select_file(&request.file)?.clone();

    Ok(Json(SelectFileResponse { selected }))
}

/// POST /api/v1/files/load — download and parse the selected file.
///
/// The session lock is released during the download so notification polls
/// and health checks are not held up by a slow remote.
pub async fn load_file(State(state): State<AppState>) -> Result<Json<AnnotateResponse>, ApiError> {
    let pending = {
        let slot = state.session.lock().await;
        let session = slot.as_ref().ok_or_else(ApiError::unauthenticated)?;
        session.begin_load()?
    };
    tracing::debug!(file_id = %pending.file().id, "Downloading selected file");
    let fetched = pending.fetch().await;

    let mut slot = state.session.lock().await;
    match slot.as_ref().map(Session::id) {
        None => return Err(ApiError::unauthenticated()),
        Some(id) if id != pending.session_id() => return Err(SessionError::SessionChanged.into()),
        Some(_) => {}
    }

    let raw = match fetched {
        Ok(raw) => raw,
        Err(e) => return Err(session_failure(&mut slot, e)),
    };
    let session = slot.as_mut().ok_or_else(ApiError::unauthenticated)?;
    if let Err(e) = session.finish_load(pending, &raw) {
        return Err(session_failure(&mut slot, e));
    }
    annotate_response(session).map(Json)
}

/// GET /api/v1/annotate — the record awaiting a label plus progress.
pub async fn current(State(state): State<AppState>) -> Result<Json<AnnotateResponse>, ApiError> {
    let slot = state.session.lock().await;
    let session = slot.as_ref().ok_or_else(ApiError::unauthenticated)?;
    annotate_response(session).map(Json)
}

/// POST /api/v1/label — label the current record and move on.
pub async fn label(
    State(state): State<AppState>,
    Json(request): Json<LabelRequest>,
) -> Result<Json<LabelReceipt>, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let label = Label::from_u8(request.value)
        .ok_or_else(|| ApiError::bad_request("label value must be 0 or 1"))?;

    let mut slot = state.session.lock().await;
    let session = slot.as_mut().ok_or_else(ApiError::unauthenticated)?;
    let receipt = session.label(label)?;

    Ok(Json(receipt))
}

/// GET /api/v1/notifications — sync outcomes since the last poll.
pub async fn notifications(
    State(state): State<AppState>,
) -> Result<Json<Vec<NotificationResponse>>, ApiError> {
    let mut slot = state.session.lock().await;
    let session = slot.as_mut().ok_or_else(ApiError::unauthenticated)?;

    let notices: Vec<NotificationResponse> = session
        .drain_notices()
        .into_iter()
        .map(|notice| NotificationResponse {
            message: notice.message(),
            notice,
        })
        .collect();

    // A background write found the credentials expired: end the session so
    // the next command asks for a new login.
    let expired = notices
        .iter()
        .any(|n| n.notice.outcome == SyncOutcome::Failure(SyncFailure::AuthExpired));
    if expired {
        if let Some(session) = slot.take() {
            tracing::warn!(session_id = %session.id(), "Sync reported expired credentials, session ended");
        }
    }

    Ok(Json(notices))
}

/// GET /api/v1/history — per-label timing for this session.
pub async fn history(State(state): State<AppState>) -> Result<Json<Vec<LabelEvent>>, ApiError> {
    let slot = state.session.lock().await;
    let session = slot.as_ref().ok_or_else(ApiError::unauthenticated)?;
    Ok(Json(session.history().to_vec()))
}

fn annotate_response(session: &Session) -> Result<AnnotateResponse, ApiError> {
    let dataset = session
        .dataset()
        .ok_or(SessionError::NoDatasetLoaded)?;
    let progress = dataset.progress();

    Ok(AnnotateResponse {
        file: dataset.file().clone(),
        progress,
        current: session.current()?,
        complete: progress.is_complete(),
    })
}
