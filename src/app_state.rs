use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{self, AppConfig, ConfigError, StorageBackend};
use crate::models::dataset::ColumnNames;
use crate::services::{
    local::LocalDirStorage,
    oauth::{OAuthClient, PendingAuthorization},
    storage::{R2Client, RemoteStorage, StorageError},
};
use crate::session::Session;

/// How the Authenticate command obtains a storage handle.
pub enum Authenticator {
    /// Google consent flow; the callback yields a Drive client.
    OAuth(Arc<OAuthClient>),
    /// Credentials come from configuration, so login opens a session at once.
    Preconfigured(Arc<dyn RemoteStorage>),
}

/// Shared application state passed to all route handlers. Holds at most one
/// annotation session.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub session: Arc<Mutex<Option<Session>>>,
    pub pending_auth: Arc<Mutex<Option<PendingAuthorization>>>,
    pub columns: ColumnNames,
    pub sync_timeout: Duration,
}

impl AppState {
    pub fn new(authenticator: Authenticator, columns: ColumnNames, sync_timeout: Duration) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            session: Arc::new(Mutex::new(None)),
            pending_auth: Arc::new(Mutex::new(None)),
            columns,
            sync_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let authenticator = match config.storage_backend {
            StorageBackend::Drive => {
                Authenticator::OAuth(Arc::new(OAuthClient::new(config.oauth_settings()?)))
            }
            StorageBackend::R2 => {
                let client = R2Client::new(
                    &config::required(&config.r2_bucket, "R2_BUCKET")?,
                    &config::required(&config.r2_endpoint, "R2_ENDPOINT")?,
                    &config::required(&config.r2_access_key, "R2_ACCESS_KEY")?,
                    &config::required(&config.r2_secret_key, "R2_SECRET_KEY")?,
                    &config.r2_prefix,
                )?;
                Authenticator::Preconfigured(Arc::new(client))
            }
            StorageBackend::Local => {
                let dir = config::required(&config.local_data_dir, "LOCAL_DATA_DIR")?;
                Authenticator::Preconfigured(Arc::new(LocalDirStorage::new(dir)?))
            }
        };

        Ok(Self::new(authenticator, config.columns(), config.sync_timeout()))
    }

    /// Replace any existing session with a fresh one around `storage`.
    pub async fn open_session(&self, storage: Arc<dyn RemoteStorage>) -> uuid::Uuid {
        let session = Session::new(storage, self.columns.clone(), self.sync_timeout);
        let id = session.id();

        let previous = self.session.lock().await.replace(session);
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                tracing::warn!(error = %e, "Failed to close replaced session");
            }
        }
        id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
