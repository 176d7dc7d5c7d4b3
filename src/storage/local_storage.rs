//! Local filesystem implementation of the StorageManager trait

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs as tokio_fs;

use super::{
    ClientConfig, Result, StorageDescription, StorageEntry, StorageError, StorageKind,
    StorageManager, path_segments,
};

/// Stores backup copies below a directory of the host filesystem
pub struct LocalStorageManager {
    id: String,
    kind: StorageKind,
    root: PathBuf,
}

impl LocalStorageManager {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: StorageKind::Local,
            root: root.into(),
        }
    }

    /// Create the root directory if needed and return the manager
    pub async fn open(conf: &ClientConfig) -> Result<Self> {
        let manager = Self::new(conf.id.clone(), PathBuf::from(&conf.root));
        tokio_fs::create_dir_all(&manager.root).await?;
        Ok(manager)
    }

    /// Same manager reporting itself as another kind, for mounted backends
    pub(crate) fn with_kind(mut self, kind: StorageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the full filesystem path for a storage path
    fn resolve(&self, path: &str) -> PathBuf {
        path_segments(path).fold(self.root.clone(), |full, part| full.join(part))
    }
}

fn map_io(err: io::Error, path: &Path) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl StorageManager for LocalStorageManager {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let source = self.resolve(path);
        tokio_fs::read(&source).await.map_err(|e| map_io(e, &source))
    }

    async fn write(&self, content: &[u8], path: &str) -> Result<String> {
        let dest = self.resolve(path);
        if let Some(parent) = dest.parent() {
            tokio_fs::create_dir_all(parent).await?;
        }

        tokio_fs::write(&dest, content).await?;
        Ok(dest.display().to_string())
    }

    async fn ls(&self, path: &str) -> Result<Vec<StorageEntry>> {
        let dir = self.resolve(path);
        let mut entries = tokio_fs::read_dir(&dir).await.map_err(|e| map_io(e, &dir))?;

        let mut listed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let modified = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            listed.push(StorageEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                modified,
            ));
        }

        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        if target == self.root {
            return Err(StorageError::Config(format!(
                "refusing to remove the root of volume '{}'",
                self.id
            )));
        }

        let meta = tokio_fs::metadata(&target).await.map_err(|e| map_io(e, &target))?;
        if meta.is_dir() {
            tokio_fs::remove_dir_all(&target).await?;
        } else {
            tokio_fs::remove_file(&target).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> StorageDescription {
        StorageDescription {
            id: self.id.clone(),
            kind: self.kind,
            location: self.root.display().to_string(),
        }
    }
}
