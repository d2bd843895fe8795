use async_trait::async_trait;
use chrono::Duration;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::services::oauth::{OAuthClient, OAuthError, TokenSet};
use crate::services::storage::{resolve_file_id, FileQuery, RemoteFile, RemoteStorage, StorageError};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const PAGE_SIZE: &str = "100";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
}

/// Google Drive v3 client authenticated with an OAuth token set.
pub struct DriveClient {
    http: Client,
    oauth: Arc<OAuthClient>,
    token: RwLock<TokenSet>,
    api_base: String,
    upload_base: String,
}

impl DriveClient {
    /// Requests carry their own timeout so an upload abandoned by the sync
    /// gateway still settles and releases the file.
    pub fn new(oauth: Arc<OAuthClient>, token: TokenSet) -> Result<Self, StorageError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            oauth,
            token: RwLock::new(token),
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
        })
    }

    /// Point the client at another Drive-compatible endpoint.
    pub fn with_base_urls(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    /// Current access token, refreshed first if it is about to expire.
    async fn access_token(&self) -> Result<String, StorageError> {
        {
            let token = self.token.read().await;
            if !token.expires_within(Duration::seconds(60)) {
                return Ok(token.access_token.clone());
            }
        }

        let mut token = self.token.write().await;
        // Another request may have refreshed while we waited for the lock.
        if !token.expires_within(Duration::seconds(60)) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or(StorageError::AuthExpired)?;

        match self.oauth.refresh(&refresh_token).await {
            Ok(fresh) => {
                *token = fresh;
                Ok(token.access_token.clone())
            }
            Err(OAuthError::InvalidGrant) => {
                tracing::warn!("Drive refresh token rejected");
                Err(StorageError::AuthExpired)
            }
            Err(OAuthError::Http(e)) => Err(StorageError::Http(e)),
            Err(e) => Err(StorageError::Remote {
                status: 0,
                message: e.to_string(),
            }),
        }
    }

    async fn check(file_id: &str, response: Response) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => StorageError::AuthExpired,
            StatusCode::NOT_FOUND => StorageError::NotFound(file_id.to_string()),
            _ => StorageError::Remote {
                status: status.as_u16(),
                message,
            },
        })
    }
}

fn drive_query(query: &FileQuery) -> String {
    let mut clauses = vec!["trashed = false".to_string()];
    if let Some(mime) = &query.mime_type {
        clauses.push(format!("mimeType = '{}'", escape_literal(mime)));
    }
    if let Some(name) = &query.name_contains {
        clauses.push(format!("name contains '{}'", escape_literal(name)));
    }
    clauses.join(" and ")
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl RemoteStorage for DriveClient {
    fn backend_name(&self) -> &'static str {
        "drive"
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, StorageError> {
        let q = drive_query(query);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.access_token().await?;
            let mut params = vec![
                ("q", q.as_str()),
                ("pageSize", PAGE_SIZE),
                ("fields", "nextPageToken, files(id, name, mimeType)"),
            ];
            if let Some(page) = page_token.as_deref() {
                params.push(("pageToken", page));
            }

            let response = self
                .http
                .get(format!("{}/files", self.api_base))
                .bearer_auth(token)
                .query(&params)
                .send()
                .await?;
            let page: FileListResponse = Self::check("", response).await?.json().await?;

            files.extend(page.files.into_iter().map(|f| RemoteFile {
                id: f.id,
                name: f.name,
                mime_type: f.mime_type,
            }));

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        tracing::debug!(count = files.len(), "Listed Drive files");
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, StorageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/files/{file_id}", self.api_base))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let bytes = Self::check(file_id, response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn upload(&self, file_id: &str, data: &[u8], mime_type: &str) -> Result<(), StorageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .patch(format!("{}/files/{file_id}", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(data.to_vec())
            .send()
            .await?;
        Self::check(file_id, response).await?;
        Ok(())
    }

    fn resolve_reference(&self, input: &str) -> Option<String> {
        resolve_file_id(input)
    }

    async fn revoke(&self) -> Result<(), StorageError> {
        let token = self.token.read().await;
        // Revoking the refresh token also invalidates its access tokens.
        let target = token
            .refresh_token
            .as_deref()
            .unwrap_or(&token.access_token);
        self.oauth.revoke(target).await.map_err(|e| match e {
            OAuthError::Http(e) => StorageError::Http(e),
            other => StorageError::Remote {
                status: 0,
                message: other.to_string(),
            },
        })
    }
}
