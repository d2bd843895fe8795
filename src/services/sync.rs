//! Mirrors the in-memory dataset to remote storage.
//!
//! Every persist uploads a full snapshot, so a failed write is healed by the
//! next successful one. Writes for the same file are serialized and ordered
//! by a sequence number taken when the persist was requested: a snapshot
//! older than one already written is never uploaded over it.
//!
//! The timeout bounds how long a caller waits, not how long a request runs.
//! An upload that times out keeps the file's lock until its request settles,
//! so it cannot land after a newer write. Later persists wait for it within
//! their own timeout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::dataset::{Dataset, Progress};
use crate::services::storage::{RemoteStorage, StorageError, CSV_MIME_TYPE};

/// Why a persist attempt did not reach remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncFailure {
    #[error("upload timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("storage credentials expired")]
    AuthExpired,

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("could not serialize dataset: {message}")]
    Serialize { message: String },
}

impl SyncFailure {
    fn metric_reason(&self) -> &'static str {
        match self {
            SyncFailure::Timeout { .. } => "timeout",
            SyncFailure::AuthExpired => "auth_expired",
            SyncFailure::Storage { .. } => "storage",
            SyncFailure::Serialize { .. } => "serialize",
        }
    }
}

impl From<StorageError> for SyncFailure {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AuthExpired => SyncFailure::AuthExpired,
            other => SyncFailure::Storage {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failure(SyncFailure),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success)
    }
}

/// Published once per background sync, whatever its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SyncNotice {
    pub file_id: String,
    pub sequence: u64,
    pub outcome: SyncOutcome,
    pub progress: Progress,
    pub finished_at: DateTime<Utc>,
}

impl SyncNotice {
    /// Operator-facing message.
    pub fn message(&self) -> String {
        match &self.outcome {
            SyncOutcome::Success => "Progress saved!".to_string(),
            SyncOutcome::Failure(reason) => format!("Error saving progress: {reason}"),
        }
    }
}

#[derive(Default)]
struct FileSyncState {
    /// Highest sequence number successfully uploaded for this file.
    written: Option<u64>,
}

struct Inner {
    storage: Arc<dyn RemoteStorage>,
    timeout: Duration,
    sequence: AtomicU64,
    files: Mutex<HashMap<String, Arc<tokio::sync::Mutex<FileSyncState>>>>,
    notices: mpsc::UnboundedSender<SyncNotice>,
}

/// Handle for persisting dataset snapshots. Cheap to clone; clones share the
/// per-file ordering state.
#[derive(Clone)]
pub struct SyncGateway {
    inner: Arc<Inner>,
}

impl SyncGateway {
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SyncNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Self {
            inner: Arc::new(Inner {
                storage,
                timeout,
                sequence: AtomicU64::new(0),
                files: Mutex::new(HashMap::new()),
                notices: tx,
            }),
        };
        (gateway, rx)
    }

    /// Serialize `dataset` and overwrite the remote object `file_id`.
    pub async fn persist(&self, dataset: &Dataset, file_id: &str) -> SyncOutcome {
        let sequence = self.next_sequence();
        self.persist_sequenced(dataset, file_id, sequence).await
    }

    /// Launch a detached persist of `snapshot` to its own file. The outcome
    /// is published on the notice channel and returned through the handle;
    /// dropping the handle does not cancel the write.
    pub fn spawn(&self, snapshot: Arc<Dataset>) -> JoinHandle<SyncOutcome> {
        let sequence = self.next_sequence();
        let gateway = self.clone();

        tokio::spawn(async move {
            let file_id = snapshot.file().id.clone();
            let outcome = gateway
                .persist_sequenced(&snapshot, &file_id, sequence)
                .await;

            let notice = SyncNotice {
                file_id,
                sequence,
                outcome: outcome.clone(),
                progress: snapshot.progress(),
                finished_at: Utc::now(),
            };
            // The receiver is gone once the session has been torn down.
            if gateway.inner.notices.send(notice).is_err() {
                tracing::debug!(sequence, "Sync notice dropped, session closed");
            }
            outcome
        })
    }

    fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn file_lock(&self, file_id: &str) -> Arc<tokio::sync::Mutex<FileSyncState>> {
        let mut files = self
            .inner
            .files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(files.entry(file_id.to_string()).or_default())
    }

    async fn persist_sequenced(&self, dataset: &Dataset, file_id: &str, sequence: u64) -> SyncOutcome {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.inner.timeout;

        let bytes = match dataset.to_csv() {
            Ok(bytes) => bytes,
            Err(e) => {
                let failure = SyncFailure::Serialize {
                    message: e.to_string(),
                };
                return Self::report(file_id, sequence, start, Err(failure));
            }
        };

        let lock = self.file_lock(file_id);
        let Ok(mut state) = tokio::time::timeout_at(deadline, lock.lock_owned()).await else {
            tracing::warn!(file_id, sequence, "Timed out waiting for an earlier upload of this file");
            return Self::report(file_id, sequence, start, Err(self.timeout_failure()));
        };

        if state.written.is_some_and(|written| written > sequence) {
            tracing::debug!(
                file_id,
                sequence,
                written = state.written,
                "Skipping snapshot superseded by a newer upload"
            );
            return SyncOutcome::Success;
        }

        // The upload task owns the file lock and outlives a timeout.
        let storage = Arc::clone(&self.inner.storage);
        let target = file_id.to_string();
        let mut upload = tokio::spawn(async move {
            let result = storage.upload(&target, &bytes, CSV_MIME_TYPE).await;
            if result.is_ok() {
                state.written = Some(sequence);
            }
            result
        });

        let result = match tokio::time::timeout_at(deadline, &mut upload).await {
            Ok(Ok(result)) => result.map_err(SyncFailure::from),
            Ok(Err(join_error)) => Err(SyncFailure::Storage {
                message: join_error.to_string(),
            }),
            Err(_) => {
                tracing::warn!(file_id, sequence, "Upload still in flight after timeout");
                Err(self.timeout_failure())
            }
        };

        Self::report(file_id, sequence, start, result)
    }

    fn timeout_failure(&self) -> SyncFailure {
        SyncFailure::Timeout {
            after_ms: self.inner.timeout.as_millis() as u64,
        }
    }

    fn report(
        file_id: &str,
        sequence: u64,
        start: Instant,
        result: Result<(), SyncFailure>,
    ) -> SyncOutcome {
        let elapsed = start.elapsed();
        metrics::counter!("sync_attempts_total").increment(1);
        metrics::histogram!("sync_duration_seconds").record(elapsed.as_secs_f64());

        match result {
            Ok(()) => {
                tracing::info!(
                    file_id,
                    sequence,
                    duration_ms = elapsed.as_millis() as u64,
                    "Dataset synced"
                );
                SyncOutcome::Success
            }
            Err(reason) => {
                metrics::counter!("sync_failures_total", "reason" => reason.metric_reason())
                    .increment(1);
                tracing::error!(file_id, sequence, error = %reason, "Dataset sync failed");
                SyncOutcome::Failure(reason)
            }
        }
    }
}
