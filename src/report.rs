//! Per-run JSON reports
//!
//! One row per executed entity, written to `report_<dd-mm-yyyy>.json`.
//! Entities skipped by their schedule produce no row.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backup::naming::DATE_FORMAT;
use crate::backup::{BackupEntity, EntityStatus};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub date: DateTime<Local>,
    /// Task id
    pub id: String,
    /// Object id of the entity
    pub name: String,
    pub status: EntityStatus,
    #[serde(rename = "startTime")]
    pub start_time: Option<DateTime<Local>>,
    #[serde(rename = "finishTime")]
    pub finish_time: Option<DateTime<Local>>,
    #[serde(rename = "sourceSize")]
    pub source_size: u64,
    #[serde(rename = "backupSize")]
    pub backup_size: u64,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub details: String,
}

impl Report {
    /// Row of an executed entity, `None` for a skipped one
    pub fn from_entity(run: DateTime<Local>, entity: &BackupEntity) -> Option<Self> {
        let status = entity.status()?;
        Some(Self {
            date: run,
            id: entity.id().to_string(),
            name: entity.oid(),
            status,
            start_time: entity.start_time(),
            finish_time: entity.end_time(),
            source_size: entity.source_size(),
            backup_size: entity.backup_size(),
            paths: entity.backup_paths().to_vec(),
            details: entity.error().map(ToString::to_string).unwrap_or_default(),
        })
    }
}

pub fn collect_reports(run: DateTime<Local>, entities: &[BackupEntity]) -> Vec<Report> {
    entities
        .iter()
        .filter_map(|entity| Report::from_entity(run, entity))
        .collect()
}

pub fn report_file_name(date: NaiveDate) -> String {
    format!("report_{}.json", date.format(DATE_FORMAT))
}

/// Write the reports of a run into `dir`, returning the file path
pub fn write_reports(dir: &Path, run: DateTime<Local>, reports: &[Report]) -> Result<PathBuf, ReportError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(run.date_naive()));
    let content = serde_json::to_vec_pretty(reports)?;
    std::fs::write(&path, content)?;

    info!(path = %path.display(), rows = reports.len(), "report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::EntitySource;
    use crate::capture::FileCapture;
    use crate::capture::file::FileFilter;
    use crate::schedule::PeriodRule;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn run() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 4, 3, 0, 0).unwrap()
    }

    fn sample() -> Report {
        Report {
            date: run(),
            id: "acct-db".into(),
            name: "acct".into(),
            status: EntityStatus::Error,
            start_time: Some(run()),
            finish_time: Some(run()),
            source_size: 2048,
            backup_size: 512,
            paths: vec!["/mnt/backup/acct-db/04-01-2024/acct/acct.zip".into()],
            details: "distribution failed".into(),
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            report_file_name(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()),
            "report_04-01-2024.json"
        );
    }

    #[test]
    fn test_json_keys() {
        let value = serde_json::to_value(sample()).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "date", "id", "name", "status", "startTime", "finishTime",
            "sourceSize", "backupSize", "paths", "details",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object["status"], "error");
        assert_eq!(object["sourceSize"], 2048);
    }

    #[test]
    fn test_skipped_entities_have_no_row() {
        let entity = BackupEntity::new(
            "docs",
            EntitySource::Files(FileCapture::new("/srv/docs", FileFilter::default())),
            PeriodRule::default(),
            Vec::new(),
            1,
            false,
        );

        assert!(collect_reports(run(), &[entity]).is_empty());
    }

    #[test]
    fn test_write_and_read_back() {
        let temp_dir = tempdir().unwrap();
        let path = write_reports(temp_dir.path(), run(), &[sample()]).unwrap();

        assert!(path.ends_with("report_04-01-2024.json"));
        let parsed: Vec<Report> = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(parsed, vec![sample()]);
    }
}
