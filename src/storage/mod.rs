//! Storage module for backup copies
//!
//! This module provides an abstraction layer over the places backup copies
//! are written to: a local directory, an SMB share mounted into the host
//! filesystem, or an S3-compatible object store. Every backend is addressed
//! with `/`-separated paths relative to its configured root.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

pub mod local_storage;
pub mod s3_storage;
pub mod smb_storage;

/// Storage error type
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("operation on '{0}' timed out")]
    Timeout(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// A storage error attributed to the manager it came from
#[derive(Debug, thiserror::Error)]
#[error("{manager}: {source}")]
pub struct ManagerError {
    pub manager: String,
    #[source]
    pub source: StorageError,
}

/// Kind of backend behind a volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Smb,
    S3,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageKind::Local => "local",
            StorageKind::Smb => "smb",
            StorageKind::S3 => "s3",
        };
        f.write_str(name)
    }
}

/// Everything needed to open a storage manager
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub id: String,
    pub kind: StorageKind,
    /// Subpath inside the backend all paths are relative to
    pub root: String,
    pub host: String,
    pub port: u16,
    pub domain: String,
    pub user: String,
    pub password: String,
    pub mount_point: PathBuf,
    pub bucket_name: String,
    pub key_id: String,
    pub key_secret: String,
    pub region: String,
    pub endpoint: Option<String>,
}

/// One child of a listed container
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEntry {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
}

impl StorageEntry {
    pub fn new(name: impl Into<String>, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            modified,
        }
    }
}

/// Short identification of a manager, used in logs and error messages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageDescription {
    pub id: String,
    pub kind: StorageKind,
    pub location: String,
}

impl fmt::Display for StorageDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.kind, self.id, self.location)
    }
}

/// Provides a unified interface for backup storage operations
///
/// Paths are `/`-separated and relative to the manager's root. A manager
/// may be called concurrently from several tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageManager: Send + Sync {
    /// Read the whole content stored at `path`
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Store `content` at `path`, creating intermediate containers
    ///
    /// Returns the resolved location that was written.
    async fn write(&self, content: &[u8], path: &str) -> Result<String>;

    /// List the direct children of the container at `path`
    ///
    /// Fails with [`StorageError::NotFound`] when the container is missing.
    async fn ls(&self, path: &str) -> Result<Vec<StorageEntry>>;

    /// Remove the file or the whole container at `path`
    async fn remove(&self, path: &str) -> Result<()>;

    /// Release the connection
    async fn close(&self) -> Result<()>;

    fn describe(&self) -> StorageDescription;
}

/// Open a storage manager for the given volume definition
pub async fn create_storage_manager(conf: &ClientConfig) -> Result<Arc<dyn StorageManager>> {
    debug!(id = %conf.id, kind = %conf.kind, "opening storage manager");

    let manager: Arc<dyn StorageManager> = match conf.kind {
        StorageKind::Local => Arc::new(local_storage::LocalStorageManager::open(conf).await?),
        StorageKind::Smb => Arc::new(smb_storage::SmbStorageManager::open(conf).await?),
        StorageKind::S3 => Arc::new(s3_storage::S3StorageManager::open(conf).await?),
    };

    info!(manager = %manager.describe(), "storage manager ready");
    Ok(manager)
}

/// Open managers keyed by volume id, in configuration order
#[derive(Default)]
pub struct StorageRegistry {
    managers: Vec<(String, Arc<dyn StorageManager>)>,
}

impl StorageRegistry {
    /// Open every volume; any failure is fatal
    pub async fn from_configs(confs: &[ClientConfig]) -> Result<Self> {
        let mut registry = Self::default();
        for conf in confs {
            let manager = create_storage_manager(conf).await?;
            registry.insert(conf.id.clone(), manager)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, id: String, manager: Arc<dyn StorageManager>) -> Result<()> {
        if self.get(&id).is_some() {
            return Err(StorageError::Config(format!("duplicate volume id '{id}'")));
        }
        self.managers.push((id, manager));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn StorageManager>> {
        self.managers
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, manager)| Arc::clone(manager))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn StorageManager>)> {
        self.managers.iter().map(|(id, manager)| (id.as_str(), manager))
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

/// Split a relative storage path into its non-empty components
pub(crate) fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty() && *part != ".")
}
