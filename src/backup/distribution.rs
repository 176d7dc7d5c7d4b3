//! Copying local artifacts to storage managers
//!
//! Artifacts are processed in batches of [`BATCH_SIZE`]. Each file of a
//! batch is read once, then written to every manager concurrently; the next
//! batch starts only when every write of the current one has finished, and
//! the buffers of a batch are released before the next is read.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::future::join_all;
use tokio::fs as tokio_fs;
use tracing::{debug, error, info};

use super::naming::{artifact_sub_dir, remote_path, run_folder};
use crate::storage::{StorageError, StorageManager};

/// Number of artifacts held in memory at once
pub const BATCH_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum DistributionFailure {
    #[error("could not read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{manager}: could not write {path}: {source}")]
    Write {
        manager: String,
        path: String,
        #[source]
        source: StorageError,
    },
}

/// Paths written and failures collected while distributing
#[derive(Debug, Default)]
pub struct Distribution {
    pub written: Vec<String>,
    pub failures: Vec<DistributionFailure>,
}

struct BatchItem {
    sub_dir: String,
    name: String,
    content: Vec<u8>,
}

/// Write every artifact to `<container>/<run date>/<sub dir>/<name>` on every manager
///
/// A read failure stops the distribution; write failures are collected and
/// do not stop the other writes.
pub async fn distribute(
    container: &str,
    artifacts: &[PathBuf],
    managers: &[Arc<dyn StorageManager>],
    run_date: NaiveDate,
    write_timeout: Option<Duration>,
) -> Distribution {
    let folder = run_folder(run_date);
    let mut outcome = Distribution::default();

    for chunk in artifacts.chunks(BATCH_SIZE) {
        let mut batch = Vec::with_capacity(chunk.len());
        for path in chunk {
            match read_item(path).await {
                Ok(item) => batch.push(item),
                Err(failure) => {
                    error!(error = %failure, "stop distribution");
                    outcome.failures.push(failure);
                    return outcome;
                }
            }
        }

        let folder = folder.as_str();
        let writes = batch.iter().flat_map(|item| {
            managers.iter().map(move |manager| {
                let dest = remote_path(&[container, folder, &item.sub_dir, &item.name]);
                write_item(manager.as_ref(), &item.content, dest, write_timeout)
            })
        });

        for result in join_all(writes).await {
            match result {
                Ok(path) => outcome.written.push(path),
                Err(failure) => {
                    error!(error = %failure, "write failed");
                    outcome.failures.push(failure);
                }
            }
        }
        drop(batch);
    }

    info!(
        written = outcome.written.len(),
        failed = outcome.failures.len(),
        "distribution finished"
    );
    outcome
}

async fn read_item(path: &Path) -> Result<BatchItem, DistributionFailure> {
    let content = tokio_fs::read(path)
        .await
        .map_err(|source| DistributionFailure::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(BatchItem {
        sub_dir: artifact_sub_dir(path),
        name,
        content,
    })
}

async fn write_item(
    manager: &dyn StorageManager,
    content: &[u8],
    dest: String,
    write_timeout: Option<Duration>,
) -> Result<String, DistributionFailure> {
    let description = manager.describe();
    let started = Instant::now();
    debug!(manager = %description, dest = %dest, "start moving to target manager");

    let result = match write_timeout {
        Some(limit) => tokio::time::timeout(limit, manager.write(content, &dest))
            .await
            .unwrap_or_else(|_| Err(StorageError::Timeout(dest.clone()))),
        None => manager.write(content, &dest).await,
    };

    debug!(manager = %description, dest = %dest, elapsed = ?started.elapsed(), "finish moving to target manager");
    result.map_err(|source| DistributionFailure::Write {
        manager: description.id,
        path: dest,
        source,
    })
}
