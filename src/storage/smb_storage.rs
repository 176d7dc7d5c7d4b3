//! SMB share storage
//!
//! The share is expected to be mounted into the host filesystem (usually by
//! a `beforeStart` hook). All operations go through the mount point, so the
//! manager is a thin wrapper around [`LocalStorageManager`] that checks the
//! mount on open and reports the remote address.

use async_trait::async_trait;
use tokio::fs as tokio_fs;
use tracing::debug;

use super::local_storage::LocalStorageManager;
use super::{
    ClientConfig, Result, StorageDescription, StorageEntry, StorageError, StorageKind,
    StorageManager, path_segments,
};

pub struct SmbStorageManager {
    address: String,
    inner: LocalStorageManager,
}

impl SmbStorageManager {
    pub async fn open(conf: &ClientConfig) -> Result<Self> {
        if conf.mount_point.as_os_str().is_empty() {
            return Err(StorageError::Config(format!(
                "volume '{}' has no mountpoint for //{}",
                conf.id, conf.host
            )));
        }

        let mounted = tokio_fs::metadata(&conf.mount_point)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !mounted {
            return Err(StorageError::Config(format!(
                "share //{}:{} is not mounted at {}",
                conf.host,
                conf.port,
                conf.mount_point.display()
            )));
        }

        let root = path_segments(&conf.root).fold(conf.mount_point.clone(), |p, s| p.join(s));
        tokio_fs::create_dir_all(&root).await?;
        debug!(id = %conf.id, user = %conf.user, domain = %conf.domain, "using mounted share");

        Ok(Self {
            address: format!("//{}:{}/{}", conf.host, conf.port, conf.root.trim_matches('/')),
            inner: LocalStorageManager::new(conf.id.clone(), root).with_kind(StorageKind::Smb),
        })
    }
}

#[async_trait]
impl StorageManager for SmbStorageManager {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, content: &[u8], path: &str) -> Result<String> {
        self.inner.write(content, path).await
    }

    async fn ls(&self, path: &str) -> Result<Vec<StorageEntry>> {
        self.inner.ls(path).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.inner.remove(path).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn describe(&self) -> StorageDescription {
        StorageDescription {
            location: self.address.clone(),
            ..self.inner.describe()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn conf(mount_point: std::path::PathBuf) -> ClientConfig {
        ClientConfig {
            id: "share".into(),
            kind: StorageKind::Smb,
            host: "fileserver".into(),
            port: 445,
            root: "backups/db".into(),
            mount_point,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_requires_mounted_share() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("not-mounted");

        assert!(matches!(
            SmbStorageManager::open(&conf(missing)).await,
            Err(StorageError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_below_root_of_mount() {
        let temp_dir = tempdir().unwrap();
        let manager = SmbStorageManager::open(&conf(temp_dir.path().to_path_buf()))
            .await
            .unwrap();

        manager.write(b"x", "docs/01-01-2024/docs/docs.tar").await.unwrap();

        assert!(temp_dir
            .path()
            .join("backups/db/docs/01-01-2024/docs/docs.tar")
            .is_file());
        let description = manager.describe();
        assert_eq!(description.kind, StorageKind::Smb);
        assert_eq!(description.location, "//fileserver:445/backups/db");
    }
}
