//! Annotation session: everything that lives between login and logout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::dataset::{ColumnNames, Dataset, DatasetError, FileRef, Progress};
use crate::models::label::Label;
use crate::services::cursor::next_unlabeled;
use crate::services::storage::{FileQuery, RemoteFile, RemoteStorage, StorageError};
use crate::services::sync::{SyncGateway, SyncNotice};

/// The record currently shown to the annotator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordView {
    pub index: usize,
    /// 1-based position for display ("Job 3 of 40").
    pub position: usize,
    pub total: usize,
    pub title: Option<String>,
    pub organization: Option<String>,
    pub description: Option<String>,
}

/// Timing entry for one annotation decision.
#[derive(Debug, Clone, Serialize)]
pub struct LabelEvent {
    pub index: usize,
    pub label: Label,
    pub shown_at: DateTime<Utc>,
    pub labeled_at: DateTime<Utc>,
    pub seconds_spent: f64,
}

/// Result of a label command, returned before the remote write finishes.
#[derive(Debug, Clone, Serialize)]
pub struct LabelReceipt {
    pub labeled_index: usize,
    pub label: Label,
    pub previous: Option<Label>,
    pub next: Option<RecordView>,
    pub progress: Progress,
}

pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    storage: Arc<dyn RemoteStorage>,
    sync: SyncGateway,
    notices: mpsc::UnboundedReceiver<SyncNotice>,
    columns: ColumnNames,
    listing: HashMap<String, String>,
    selected: Option<FileRef>,
    dataset: Option<Arc<Dataset>>,
    cursor: Option<usize>,
    shown_at: DateTime<Utc>,
    history: Vec<LabelEvent>,
}

impl Session {
    /// Start a session around an already-authenticated storage handle.
    pub fn new(storage: Arc<dyn RemoteStorage>, columns: ColumnNames, sync_timeout: Duration) -> Self {
        let (sync, notices) = SyncGateway::new(Arc::clone(&storage), sync_timeout);
        let id = Uuid::new_v4();
        tracing::info!(session_id = %id, backend = storage.backend_name(), "Session started");

        Self {
            id,
            started_at: Utc::now(),
            storage,
            sync,
            notices,
            columns,
            listing: HashMap::new(),
            selected: None,
            dataset: None,
            cursor: None,
            shown_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    /// List CSV files and remember their display names.
    pub async fn list_files(&mut self) -> Result<Vec<RemoteFile>, SessionError> {
        let files = self.storage.list_files(&FileQuery::csv()).await?;
        self.listing = files
            .iter()
            .map(|f| (f.id.clone(), f.name.clone()))
            .collect();
        Ok(files)
    }

    /// Choose the file to annotate. An id from the last listing is taken
    /// verbatim; other input goes through the backend's link parsing.
    pub fn select_file(&mut self, id_or_link: &str) -> Result<&FileRef, SessionError> {
        let (id, name) = match self.listing.get_key_value(id_or_link) {
            Some((id, name)) => (id.clone(), name.clone()),
            None => {
                let id = self.storage.resolve_reference(id_or_link).ok_or_else(|| {
                    SessionError::InvalidFileReference(id_or_link.trim().to_string())
                })?;
                let name = self.listing.get(&id).cloned().unwrap_or_else(|| id.clone());
                (id, name)
            }
        };

        tracing::info!(session_id = %self.id, file_id = %id, "File selected");
        Ok(self.selected.insert(FileRef { id, name }))
    }

    pub fn selected(&self) -> Option<&FileRef> {
        self.selected.as_ref()
    }

    /// Download and parse the selected file. On failure the previously loaded
    /// dataset, if any, stays in place.
    pub async fn load_file(&mut self) -> Result<Progress, SessionError> {
        let pending = self.begin_load()?;
        let raw = pending.fetch().await?;
        self.finish_load(pending, &raw)
    }

    /// First half of [`Session::load_file`]: capture what the download needs
    /// so it can run without borrowing the session.
    pub fn begin_load(&self) -> Result<PendingLoad, SessionError> {
        let file = self.selected.clone().ok_or(SessionError::NoFileSelected)?;
        Ok(PendingLoad {
            session_id: self.id,
            file,
            storage: Arc::clone(&self.storage),
        })
    }

    /// Second half of [`Session::load_file`]: parse the downloaded bytes and
    /// make them the working dataset.
    pub fn finish_load(&mut self, pending: PendingLoad, raw: &[u8]) -> Result<Progress, SessionError> {
        let dataset = Dataset::load(raw, pending.file, &self.columns)?;
        let progress = dataset.progress();

        self.cursor = next_unlabeled(&dataset, 0);
        self.dataset = Some(Arc::new(dataset));
        self.shown_at = Utc::now();

        metrics::gauge!("annotation_progress_ratio").set(progress.ratio());
        tracing::info!(
            session_id = %self.id,
            labeled = progress.labeled,
            total = progress.total,
            "File loaded"
        );
        Ok(progress)
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_deref()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn progress(&self) -> Result<Progress, SessionError> {
        Ok(self.loaded()?.progress())
    }

    /// The record awaiting a label, or `None` once everything is labeled.
    pub fn current(&self) -> Result<Option<RecordView>, SessionError> {
        let dataset = self.loaded()?;
        Ok(self.cursor.and_then(|i| view(dataset, i)))
    }

    /// Label the current record, advance the cursor, and start a background
    /// sync of the full dataset. Returns as soon as the local update is done.
    pub fn label(&mut self, label: Label) -> Result<LabelReceipt, SessionError> {
        let dataset = self.dataset.as_mut().ok_or(SessionError::NoDatasetLoaded)?;
        let index = self.cursor.ok_or(SessionError::AnnotationComplete)?;

        // Copy-on-write: a sync still reading the previous snapshot keeps it.
        let previous = Arc::make_mut(dataset).set_label(index, label)?;
        let snapshot = Arc::clone(dataset);

        let now = Utc::now();
        self.history.push(LabelEvent {
            index,
            label,
            shown_at: self.shown_at,
            labeled_at: now,
            seconds_spent: (now - self.shown_at).num_milliseconds() as f64 / 1000.0,
        });
        self.shown_at = now;

        self.cursor = next_unlabeled(&snapshot, index + 1);
        let progress = snapshot.progress();

        metrics::counter!("annotations_total", "label" => label.to_string()).increment(1);
        metrics::gauge!("annotation_progress_ratio").set(progress.ratio());
        tracing::info!(
            session_id = %self.id,
            index,
            label = %label,
            labeled = progress.labeled,
            total = progress.total,
            "Record labeled"
        );

        self.sync.spawn(Arc::clone(&snapshot));

        Ok(LabelReceipt {
            labeled_index: index,
            label,
            previous,
            next: self.cursor.and_then(|i| view(&snapshot, i)),
            progress,
        })
    }

    pub fn history(&self) -> &[LabelEvent] {
        &self.history
    }

    /// Sync notices received since the last call.
    pub fn drain_notices(&mut self) -> Vec<SyncNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }

    /// Wait for the next sync notice.
    pub async fn next_notice(&mut self) -> Option<SyncNotice> {
        self.notices.recv().await
    }

    /// Tear the session down, revoking the storage credentials. Background
    /// syncs already in flight run to completion.
    pub async fn close(self) -> Result<(), SessionError> {
        tracing::info!(
            session_id = %self.id,
            labels = self.history.len(),
            "Session closed"
        );
        self.storage.revoke().await?;
        Ok(())
    }

    fn loaded(&self) -> Result<&Dataset, SessionError> {
        self.dataset.as_deref().ok_or(SessionError::NoDatasetLoaded)
    }
}

/// A load whose download has not happened yet.
pub struct PendingLoad {
    session_id: Uuid,
    file: FileRef,
    storage: Arc<dyn RemoteStorage>,
}

impl PendingLoad {
    /// Session the load was started from.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    pub async fn fetch(&self) -> Result<Vec<u8>, SessionError> {
        Ok(self.storage.download(&self.file.id).await?)
    }
}

fn view(dataset: &Dataset, index: usize) -> Option<RecordView> {
    let record = dataset.get(index)?;
    let schema = dataset.schema();
    Some(RecordView {
        index,
        position: index + 1,
        total: dataset.len(),
        title: schema.title(record).map(str::to_string),
        organization: schema.organization(record).map(str::to_string),
        description: schema.description(record).map(str::to_string),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No file selected")]
    NoFileSelected,

    #[error("No dataset loaded; select and load a file first")]
    NoDatasetLoaded,

    #[error("All jobs have been annotated")]
    AnnotationComplete,

    #[error("The session changed while the file was loading; please try again")]
    SessionChanged,

    #[error("Not a file id or share link: {0:?}")]
    InvalidFileReference(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
