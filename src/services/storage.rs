use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use serde::Serialize;

pub const CSV_MIME_TYPE: &str = "text/csv";

/// A file visible through a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

/// Listing filter understood by every backend.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub mime_type: Option<String>,
    pub name_contains: Option<String>,
}

impl FileQuery {
    pub fn csv() -> Self {
        Self {
            mime_type: Some(CSV_MIME_TYPE.to_string()),
            name_contains: None,
        }
    }

    pub fn matches(&self, file: &RemoteFile) -> bool {
        let mime_ok = self
            .mime_type
            .as_deref()
            .map_or(true, |m| m == file.mime_type);
        let name_ok = self
            .name_contains
            .as_deref()
            .map_or(true, |n| file.name.contains(n));
        mime_ok && name_ok
    }
}

/// Already-authenticated handle to a file store with whole-object replace
/// semantics.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, StorageError>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, StorageError>;

    /// Overwrite the object identified by `file_id` with `data`.
    async fn upload(&self, file_id: &str, data: &[u8], mime_type: &str) -> Result<(), StorageError>;

    /// Invalidate any credentials held by this handle.
    async fn revoke(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Map user input to a file id. Backends without shareable links take
    /// the input as the id itself.
    fn resolve_reference(&self, input: &str) -> Option<String> {
        let id = input.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// Extract a Drive file id from a bare id or a share link
/// (`.../d/<id>/view`, `...?id=<id>`).
pub fn resolve_file_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let id = if let Some((_, rest)) = input.split_once("/d/") {
        rest.split(['/', '?', '#']).next().unwrap_or_default()
    } else if let Some((_, query)) = input.split_once('?') {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("id="))
            .unwrap_or_default()
    } else if input.contains("://") {
        return None;
    } else {
        return Some(input.to_string());
    };

    if id.is_empty() || id.chars().any(char::is_whitespace) {
        None
    } else {
        Some(id.to_string())
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible). Object keys are
/// file ids.
pub struct R2Client {
    bucket: Box<Bucket>,
    prefix: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        prefix: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            prefix: prefix.to_string(),
        })
    }

    fn check_status(file_id: &str, status: u16, body: &[u8]) -> Result<(), StorageError> {
        match status {
            200..=299 => Ok(()),
            401 | 403 => Err(StorageError::AuthExpired),
            404 => Err(StorageError::NotFound(file_id.to_string())),
            _ => Err(StorageError::Remote {
                status,
                message: String::from_utf8_lossy(body).into_owned(),
            }),
        }
    }
}

#[async_trait]
impl RemoteStorage for R2Client {
    fn backend_name(&self) -> &'static str {
        "r2"
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, StorageError> {
        let pages = self
            .bucket
            .list(self.prefix.clone(), None)
            .await
            .map_err(StorageError::S3)?;

        let files = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .filter(|object| object.key.ends_with(".csv"))
            .map(|object| RemoteFile {
                name: object
                    .key
                    .rsplit('/')
                    .next()
                    .unwrap_or(&object.key)
                    .to_string(),
                id: object.key,
                mime_type: CSV_MIME_TYPE.to_string(),
            })
            .filter(|file| query.matches(file))
            .collect();

        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(file_id).await.map_err(StorageError::S3)?;
        Self::check_status(file_id, response.status_code(), response.as_slice())?;
        Ok(response.to_vec())
    }

    async fn upload(&self, file_id: &str, data: &[u8], mime_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(file_id, data, mime_type)
            .await
            .map_err(StorageError::S3)?;
        Self::check_status(file_id, response.status_code(), response.as_slice())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage credentials expired or were revoked; please log in again")]
    AuthExpired,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote storage returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Local storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_bare_id() {
        assert_eq!(resolve_file_id("  1AbC_d-9 ").as_deref(), Some("1AbC_d-9"));
        assert_eq!(resolve_file_id("jobs.csv").as_deref(), Some("jobs.csv"));
        assert_eq!(resolve_file_id("my jobs.csv").as_deref(), Some("my jobs.csv"));
    }

    #[test]
    fn test_resolve_share_links() {
        assert_eq!(
            resolve_file_id("https://drive.google.com/file/d/1XyZ/view?usp=sharing").as_deref(),
            Some("1XyZ")
        );
        assert_eq!(
            resolve_file_id("https://drive.google.com/open?id=1XyZ&authuser=0").as_deref(),
            Some("1XyZ")
        );
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        assert_eq!(resolve_file_id(""), None);
        assert_eq!(resolve_file_id("   "), None);
        assert_eq!(resolve_file_id("https://example.com/nothing"), None);
        assert_eq!(resolve_file_id("https://drive.google.com/file/d//view"), None);
        assert_eq!(resolve_file_id("https://drive.google.com/open?usp=x"), None);
    }

    struct PlainStorage;

    #[async_trait]
    impl RemoteStorage for PlainStorage {
        fn backend_name(&self) -> &'static str {
            "plain"
        }

        async fn list_files(&self, _query: &FileQuery) -> Result<Vec<RemoteFile>, StorageError> {
            Ok(Vec::new())
        }

        async fn download(&self, file_id: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(file_id.to_string()))
        }

        async fn upload(&self, _file_id: &str, _data: &[u8], _mime_type: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_reference_is_taken_verbatim() {
        let storage = PlainStorage;
        assert_eq!(
            storage.resolve_reference("exports/d/jobs.csv").as_deref(),
            Some("exports/d/jobs.csv")
        );
        assert_eq!(storage.resolve_reference("a?id=b.csv").as_deref(), Some("a?id=b.csv"));
        assert_eq!(storage.resolve_reference(" my jobs.csv ").as_deref(), Some("my jobs.csv"));
        assert_eq!(storage.resolve_reference("  "), None);
    }

    #[test]
    fn test_query_matches() {
        let file = RemoteFile {
            id: "1".to_string(),
            name: "jobs_2024.csv".to_string(),
            mime_type: CSV_MIME_TYPE.to_string(),
        };
        assert!(FileQuery::csv().matches(&file));
        assert!(FileQuery::default().matches(&file));
        let query = FileQuery {
            mime_type: None,
            name_contains: Some("2023".to_string()),
        };
        assert!(!query.matches(&file));
    }
}
