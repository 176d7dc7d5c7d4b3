//! Naming of the remote layout
//!
//! A copy lives at `<task id>/<dd-mm-yyyy>/<sub dir>/<artifact>` on every
//! storage manager. The date folder is what retention sorts on, so it is
//! parsed back with the same format it is written with.

use std::path::Path;

use chrono::NaiveDate;

/// Canonical format of run-date folders and report names
pub const DATE_FORMAT: &str = "%d-%m-%Y";

/// Folder name of a run date
pub fn run_folder(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a run-date folder name back into a date
pub fn parse_run_folder(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name, DATE_FORMAT).ok()
}

/// Join storage path parts with `/`, skipping empty ones
pub fn remote_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sub directory an artifact is stored under: its name without extensions
///
/// `acct.tar` and `acct.zip` map to `acct`, split volumes such as
/// `acct.zip.001` too. Dots inside the stem are kept (`notes.d.tar` maps
/// to `notes.d`).
pub fn artifact_sub_dir(artifact: &Path) -> String {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let without_volume = match name.rsplit_once('.') {
        Some((stem, suffix)) if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) => stem,
        _ => name.as_str(),
    };
    match without_volume.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => without_volume.to_string(),
    }
}
