//! Scanning report files for failed entities

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use regex::Regex;

use crate::backup::EntityStatus;
use crate::backup::naming::DATE_FORMAT;
use crate::report::Report;

const REPORT_NAME_PATTERN: &str = r"^report_(\d{2}-\d{2}-\d{4})\.json$";

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no date in report name {0}")]
    MissingDate(PathBuf),

    #[error("bad report name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Findings of one report file
#[derive(Debug, Clone, PartialEq)]
pub struct AuditResult {
    pub date: NaiveDate,
    pub errors: Vec<String>,
}

impl AuditResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn report_name_regex() -> Result<Regex, AuditError> {
    Ok(Regex::new(REPORT_NAME_PATTERN)?)
}

/// Report files of `dir`, sorted by name
pub fn report_paths(dir: &Path) -> Result<Vec<PathBuf>, AuditError> {
    let meta = std::fs::metadata(dir).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => AuditError::MissingDirectory(dir.to_path_buf()),
        _ => AuditError::Io {
            path: dir.to_path_buf(),
            source,
        },
    })?;
    if !meta.is_dir() {
        return Err(AuditError::NotADirectory(dir.to_path_buf()));
    }

    let pattern = report_name_regex()?;
    let io_err = |source| AuditError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file && pattern.is_match(&entry.file_name().to_string_lossy()) {
            paths.push(entry.path());
        }
    }

    paths.sort();
    Ok(paths)
}

/// Read one report and collect the details of its failed rows
pub fn audit_report(path: &Path) -> Result<AuditResult, AuditError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let date = report_name_regex()?
        .captures(&name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), DATE_FORMAT).ok())
        .ok_or_else(|| AuditError::MissingDate(path.to_path_buf()))?;

    let raw = std::fs::read(path).map_err(|source| AuditError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reports: Vec<Report> = serde_json::from_slice(&raw).map_err(|source| AuditError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(AuditResult {
        date,
        errors: failed_details(&reports),
    })
}

fn failed_details(reports: &[Report]) -> Vec<String> {
    reports
        .iter()
        .filter(|r| r.status == EntityStatus::Error)
        .map(|r| format!("{}/{}: {}", r.id, r.name, r.details))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::write_reports;
    use chrono::{Local, TimeZone};
    use tempfile::tempdir;

    fn row(status: EntityStatus, details: &str) -> Report {
        let run = Local.with_ymd_and_hms(2024, 1, 4, 3, 0, 0).unwrap();
        Report {
            date: run,
            id: "acct-db".into(),
            name: "acct".into(),
            status,
            start_time: Some(run),
            finish_time: Some(run),
            source_size: 1,
            backup_size: 1,
            paths: Vec::new(),
            details: details.into(),
        }
    }

    #[test]
    fn test_report_paths_match_name_pattern_only() {
        let temp_dir = tempdir().unwrap();
        for name in ["report_04-01-2024.json", "report_2024-01-04.json", "notes.json", "report_04-01-2024.json.bak"] {
            std::fs::write(temp_dir.path().join(name), b"[]").unwrap();
        }
        std::fs::create_dir(temp_dir.path().join("report_05-01-2024.json")).unwrap();

        let paths = report_paths(temp_dir.path()).unwrap();
        assert_eq!(paths, vec![temp_dir.path().join("report_04-01-2024.json")]);
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = tempdir().unwrap();
        assert!(matches!(
            report_paths(&temp_dir.path().join("nope")),
            Err(AuditError::MissingDirectory(_))
        ));

        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(report_paths(&file), Err(AuditError::NotADirectory(_))));
    }

    #[test]
    fn test_audit_flags_error_rows() {
        let temp_dir = tempdir().unwrap();
        let run = Local.with_ymd_and_hms(2024, 1, 4, 3, 0, 0).unwrap();
        let path = write_reports(
            temp_dir.path(),
            run,
            &[row(EntityStatus::Success, ""), row(EntityStatus::Error, "capture failed")],
        )
        .unwrap();

        let result = audit_report(&path).unwrap();

        assert_eq!(result.date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert!(result.has_errors());
        assert_eq!(result.errors, vec!["acct-db/acct: capture failed"]);
    }

    #[test]
    fn test_clean_report_and_broken_json() {
        let temp_dir = tempdir().unwrap();
        let clean = temp_dir.path().join("report_01-02-2024.json");
        std::fs::write(&clean, b"[]").unwrap();
        assert!(!audit_report(&clean).unwrap().has_errors());

        let broken = temp_dir.path().join("report_02-02-2024.json");
        std::fs::write(&broken, b"{not json").unwrap();
        assert!(matches!(audit_report(&broken), Err(AuditError::Json { .. })));
    }
}
