//! Backup entities and the steps of one entity backup
//!
//! An entity captures one source into local artifacts, distributes them to
//! every storage manager of its task and prunes copies beyond the retention
//! limit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureError;

pub mod builder;
pub mod distribution;
pub mod entity;
pub mod naming;
pub mod retention;

pub use builder::build_entities;
pub use distribution::{DistributionFailure, distribute};
pub use entity::{BackupEntity, EntitySettings, EntitySource};
pub use retention::{Cleanup, clear_old_copies};

/// Final status of an executed entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Success,
    Error,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::Success => f.write_str("success"),
            EntityStatus::Error => f.write_str("error"),
        }
    }
}

/// Backup error type
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("no artifacts were produced in {0}")]
    NoArtifacts(String),

    #[error("distribution failed: {}", join_errors(.0))]
    Distribution(Vec<DistributionFailure>),

    #[error("clearing old copies failed: {}", join_errors(.0))]
    Retention(Vec<crate::storage::ManagerError>),
}

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Display a list of errors on one line
pub(crate) fn join_errors<E: fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ManagerError, StorageError};

    #[test]
    fn test_joined_display() {
        let err = BackupError::Retention(vec![
            ManagerError {
                manager: "disk".into(),
                source: StorageError::NotFound("a".into()),
            },
            ManagerError {
                manager: "cloud".into(),
                source: StorageError::S3("denied".into()),
            },
        ]);

        assert_eq!(
            err.to_string(),
            "clearing old copies failed: disk: path not found: a; cloud: S3 error: denied"
        );
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&EntityStatus::Success).unwrap(), "\"success\"");
        assert_eq!(EntityStatus::Error.to_string(), "error");
    }
}
