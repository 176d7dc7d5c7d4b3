//! Pruning copies beyond the retention limit
//!
//! The run-date folders of a container are ordered by the date in their
//! name, falling back to the modification time for names that do not parse.
//! All but the newest `keep` folders lose the entity's sub directory, and a
//! folder left empty is removed too. Other entities' copies sharing the
//! folder are never touched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::naming::{parse_run_folder, remote_path};
use crate::storage::{ManagerError, StorageEntry, StorageError, StorageManager};

/// Outcome of a retention pass
#[derive(Debug, Default)]
pub struct Cleanup {
    pub removed: Vec<String>,
    pub failures: Vec<ManagerError>,
}

/// Remove outdated copies of `oid` under `container` on every manager
///
/// `keep == 0` disables pruning.
pub async fn clear_old_copies(
    container: &str,
    oid: &str,
    managers: &[Arc<dyn StorageManager>],
    keep: usize,
) -> Cleanup {
    let mut cleanup = Cleanup::default();
    if keep == 0 {
        debug!(container, "retention disabled");
        return cleanup;
    }

    for manager in managers {
        clear_manager(manager.as_ref(), container, oid, keep, &mut cleanup).await;
    }
    cleanup
}

async fn clear_manager(
    manager: &dyn StorageManager,
    container: &str,
    oid: &str,
    keep: usize,
    cleanup: &mut Cleanup,
) {
    let id = manager.describe().id;
    let fail = |source: StorageError, cleanup: &mut Cleanup| {
        warn!(manager = %id, error = %source, "clearing old copies");
        cleanup.failures.push(ManagerError {
            manager: id.clone(),
            source,
        });
    };

    let mut folders = match manager.ls(container).await {
        Ok(folders) => folders,
        Err(StorageError::NotFound(_)) => return,
        Err(err) => return fail(err, cleanup),
    };
    if folders.len() <= keep {
        return;
    }

    folders.sort_by_key(folder_date);
    let outdated = folders.len() - keep;

    for folder in &folders[..outdated] {
        let folder_path = remote_path(&[container, &folder.name]);
        let content = match manager.ls(&folder_path).await {
            Ok(content) => content,
            Err(err) => {
                fail(err, cleanup);
                continue;
            }
        };

        for entry in content.iter().filter(|entry| entry.name == oid) {
            let target = remote_path(&[&folder_path, &entry.name]);
            match manager.remove(&target).await {
                Ok(()) => {
                    info!(path = %target, "removed outdated copy");
                    cleanup.removed.push(target);
                }
                Err(err) => fail(err, cleanup),
            }
        }

        match manager.ls(&folder_path).await {
            Ok(rest) if rest.is_empty() => match manager.remove(&folder_path).await {
                Ok(()) | Err(StorageError::NotFound(_)) => cleanup.removed.push(folder_path),
                Err(err) => fail(err, cleanup),
            },
            Ok(_) => {}
            // object stores drop a prefix together with its last key
            Err(StorageError::NotFound(_)) => cleanup.removed.push(folder_path),
            Err(err) => fail(err, cleanup),
        }
    }
}

/// Sort key of a run-date folder
fn folder_date(entry: &StorageEntry) -> DateTime<Utc> {
    parse_run_folder(&entry.name)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|moment| moment.and_utc())
        .or(entry.modified)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
