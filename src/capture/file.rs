//! Filesystem tree capture

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{CaptureContext, CaptureOutput, Result, package};
use crate::config::ConfigError;

/// Name filters, evaluated against the file name only
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl FileFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            include: compile("include", include)?,
            exclude: compile("exclude", exclude)?,
        })
    }

    /// Exclusion wins over inclusion; no include pattern selects everything
    pub fn selects(&self, name: &str) -> bool {
        if self.exclude.as_ref().is_some_and(|re| re.is_match(name)) {
            return false;
        }
        self.include.as_ref().is_none_or(|re| re.is_match(name))
    }
}

fn compile(kind: &'static str, pattern: Option<&str>) -> std::result::Result<Option<Regex>, ConfigError> {
    pattern
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).map_err(|source| ConfigError::Regex {
                kind,
                pattern: p.to_string(),
                source,
            })
        })
        .transpose()
}

/// Copies a directory tree (or a single file) and packages it
#[derive(Debug, Clone)]
pub struct FileCapture {
    source: PathBuf,
    filter: FileFilter,
}

impl FileCapture {
    pub fn new(source: impl Into<PathBuf>, filter: FileFilter) -> Self {
        Self {
            source: source.into(),
            filter,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Base name of the source path, empty when the path has no final name
    pub fn oid(&self) -> String {
        source_name(&self.source).unwrap_or_default()
    }

    pub async fn capture(&self, workdir: &Path, ctx: &CaptureContext<'_>) -> Result<CaptureOutput> {
        let oid = self.oid();
        let staging = workdir.join(&oid);
        let (source, filter) = (self.source.clone(), self.filter.clone());

        debug!(source = %self.source.display(), "start copying");
        let (copied, source_size) =
            tokio::task::spawn_blocking(move || copy_tree(&source, &staging, &filter)).await??;
        info!(files = copied, bytes = source_size, "finish copying");

        if copied == 0 {
            warn!(source = %self.source.display(), "nothing to back up");
            tokio::fs::remove_dir_all(workdir.join(&oid)).await?;
            return Ok(CaptureOutput::default());
        }

        let (artifacts, backup_size) = package(workdir, &oid, ctx).await?;
        Ok(CaptureOutput {
            artifacts,
            source_size,
            backup_size,
        })
    }
}

/// Final name of a source path
///
/// `None` for paths ending in `..`, a root or a prefix, which cannot name a
/// backup object.
pub fn source_name(path: &Path) -> Option<String> {
    match path.components().next_back()? {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }
}

/// Copy the selected files of `source` into `staging`, keeping the layout
///
/// Returns the number of files copied and their total size.
fn copy_tree(source: &Path, staging: &Path, filter: &FileFilter) -> Result<(usize, u64)> {
    std::fs::create_dir_all(staging)?;
    let (mut copied, mut total) = (0, 0);

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !filter.selects(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let target = match entry.path().strip_prefix(source) {
            Ok(relative) if !relative.as_os_str().is_empty() => staging.join(relative),
            _ => staging.join(entry.file_name()),
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        total += std::fs::copy(entry.path(), &target)?;
        copied += 1;
    }

    Ok((copied, total))
}
