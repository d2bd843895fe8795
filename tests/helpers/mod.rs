//! Storage fakes and server helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use job_annotator::app_state::{AppState, Authenticator};
use job_annotator::models::dataset::ColumnNames;
use job_annotator::routes;
use job_annotator::services::storage::{
    resolve_file_id, FileQuery, RemoteFile, RemoteStorage, StorageError, CSV_MIME_TYPE,
};

/// In-memory object store. Each upload replaces the stored bytes in a single
/// step, like a whole-object PUT.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, (String, Vec<u8>)>>,
    uploads: AtomicUsize,
    failing_uploads: AtomicUsize,
    upload_delays: Mutex<VecDeque<Duration>>,
    download_delays: Mutex<VecDeque<Duration>>,
    share_links: bool,
    auth_expired: AtomicBool,
    revoked: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, id: &str, name: &str, contents: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(id.to_string(), (name.to_string(), contents.as_bytes().to_vec()));
        self
    }

    /// Accept Drive share links when selecting files.
    pub fn with_share_links(mut self) -> Self {
        self.share_links = true;
        self
    }

    pub fn contents(&self, id: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(id).map(|(_, bytes)| bytes.clone())
    }

    pub fn contents_str(&self, id: &str) -> String {
        String::from_utf8(self.contents(id).expect("file exists")).unwrap()
    }

    /// Successful uploads so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Make the next `n` uploads fail with a remote error.
    pub fn fail_next_uploads(&self, n: usize) {
        self.failing_uploads.store(n, Ordering::SeqCst);
    }

    /// Delay successive uploads by the given durations, in call order.
    pub fn delay_uploads(&self, delays: impl IntoIterator<Item = Duration>) {
        self.upload_delays.lock().unwrap().extend(delays);
    }

    /// Delay successive downloads by the given durations, in call order.
    pub fn delay_downloads(&self, delays: impl IntoIterator<Item = Duration>) {
        self.download_delays.lock().unwrap().extend(delays);
    }

    pub fn expire_auth(&self) {
        self.auth_expired.store(true, Ordering::SeqCst);
    }

    pub fn was_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    fn check_auth(&self) -> Result<(), StorageError> {
        if self.auth_expired.load(Ordering::SeqCst) {
            Err(StorageError::AuthExpired)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, StorageError> {
        self.check_auth()?;
        let mut files: Vec<RemoteFile> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (name, _))| RemoteFile {
                id: id.clone(),
                name: name.clone(),
                mime_type: CSV_MIME_TYPE.to_string(),
            })
            .filter(|f| query.matches(f))
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, StorageError> {
        let delay = self.download_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_auth()?;
        self.contents(file_id)
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))
    }

    async fn upload(&self, file_id: &str, data: &[u8], _mime_type: &str) -> Result<(), StorageError> {
        let delay = self.upload_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_auth()?;

        let failing = self.failing_uploads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_uploads.store(failing - 1, Ordering::SeqCst);
            return Err(StorageError::Remote {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }

        let mut files = self.files.lock().unwrap();
        let name = files
            .get(file_id)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| file_id.to_string());
        files.insert(file_id.to_string(), (name, data.to_vec()));
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn revoke(&self) -> Result<(), StorageError> {
        self.revoked.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resolve_reference(&self, input: &str) -> Option<String> {
        if self.share_links {
            return resolve_file_id(input);
        }
        let id = input.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// Serve the router on an ephemeral port and return its base URL.
pub async fn spawn_app(storage: Arc<MemoryStorage>) -> String {
    let state = AppState::new(
        Authenticator::Preconfigured(storage),
        ColumnNames::default(),
        Duration::from_secs(5),
    );
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server error");
    });

    format!("http://{}", addr)
}
