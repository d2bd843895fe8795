use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::services::storage::{FileQuery, RemoteFile, RemoteStorage, StorageError, CSV_MIME_TYPE};

/// A directory of CSV files served as a storage backend. File ids are bare
/// file names inside the root.
pub struct LocalDirStorage {
    root: PathBuf,
}

impl LocalDirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StorageError::Config(format!(
                "local storage root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn path_for(&self, file_id: &str) -> Result<PathBuf, StorageError> {
        let name = Path::new(file_id);
        let is_plain_name = name.components().count() == 1
            && name.file_name().is_some_and(|n| n == name.as_os_str());
        if !is_plain_name {
            return Err(StorageError::NotFound(file_id.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl RemoteStorage for LocalDirStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.ends_with(".csv") {
                continue;
            }
            let file = RemoteFile {
                id: name.clone(),
                name,
                mime_type: CSV_MIME_TYPE.to_string(),
            };
            if query.matches(&file) {
                files.push(file);
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(file_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(file_id.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Writes a sibling temp file and renames it over the target so readers
    /// never observe a partially written object.
    async fn upload(&self, file_id: &str, data: &[u8], _mime_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(file_id)?;
        let tmp = self
            .root
            .join(format!(".{file_id}.{}.tmp", uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }
}
