//! One backup source and its execution state

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use tokio::fs as tokio_fs;
use tracing::{Instrument, error, info, info_span, warn};

use super::distribution::{Distribution, distribute};
use super::retention::clear_old_copies;
use super::{BackupError, EntityStatus, Result};
use crate::capture::{CaptureContext, CaptureOutput, CommandRunner, FileCapture, PostgresCapture};
use crate::config::ToolPaths;
use crate::schedule::{PeriodRule, Rule};
use crate::storage::StorageManager;

/// Process-wide settings every entity backup runs with
#[derive(Debug, Clone, Default)]
pub struct EntitySettings {
    /// Root of the per-entity working directories
    pub temp_dir: PathBuf,
    pub tools: ToolPaths,
    pub runner: CommandRunner,
    pub write_timeout: Option<Duration>,
}

/// What an entity backs up
#[derive(Debug, Clone)]
pub enum EntitySource {
    Files(FileCapture),
    Postgres(PostgresCapture),
}

impl EntitySource {
    /// Object identifier: the file base name or the database name
    pub fn oid(&self) -> String {
        match self {
            EntitySource::Files(capture) => capture.oid(),
            EntitySource::Postgres(capture) => capture.oid(),
        }
    }

    async fn capture(&self, workdir: &Path, ctx: &CaptureContext<'_>) -> Result<CaptureOutput> {
        let output = match self {
            EntitySource::Files(capture) => capture.capture(workdir, ctx).await?,
            EntitySource::Postgres(capture) => capture.capture(workdir, ctx).await?,
        };
        Ok(output)
    }
}

/// Working directory of one entity
///
/// Released with [`WorkDir::release`]; dropping an unreleased guard removes
/// the directory synchronously.
struct WorkDir {
    path: PathBuf,
    released: bool,
}

impl WorkDir {
    /// Create `<root>/<name>`, emptying it first if it holds leftovers
    ///
    /// `name` must be a single plain path component.
    async fn prepare(root: &Path, name: &str) -> io::Result<Self> {
        let mut components = Path::new(name).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(part)), None) if part == name
        );
        if !single {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{name}' is not a valid working directory name"),
            ));
        }

        let path = root.join(name);
        match tokio_fs::read_dir(&path).await {
            Ok(mut entries) => {
                if entries.next_entry().await?.is_some() {
                    tokio_fs::remove_dir_all(&path).await?;
                    tokio_fs::create_dir_all(&path).await?;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tokio_fs::create_dir_all(&path).await?;
            }
            Err(err) => return Err(err),
        }
        Ok(Self { path, released: false })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn release(mut self) {
        self.released = true;
        match tokio_fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "could not clear working directory"),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "could not clear working directory");
            }
        }
    }
}

/// A single backup source of a task
pub struct BackupEntity {
    id: String,
    source: EntitySource,
    period: PeriodRule,
    managers: Vec<Arc<dyn StorageManager>>,
    keep: usize,
    compress: bool,

    start_time: Option<DateTime<Local>>,
    end_time: Option<DateTime<Local>>,
    status: Option<EntityStatus>,
    error: Option<BackupError>,
    source_size: u64,
    backup_size: u64,
    backup_files: Vec<PathBuf>,
    backup_paths: Vec<String>,
    removed_paths: Vec<String>,
}

impl BackupEntity {
    pub fn new(
        id: impl Into<String>,
        source: EntitySource,
        period: PeriodRule,
        managers: Vec<Arc<dyn StorageManager>>,
        keep: usize,
        compress: bool,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            period,
            managers,
            keep,
            compress,
            start_time: None,
            end_time: None,
            status: None,
            error: None,
            source_size: 0,
            backup_size: 0,
            backup_files: Vec::new(),
            backup_paths: Vec::new(),
            removed_paths: Vec::new(),
        }
    }

    /// Whether the entity is due on `date`
    pub fn check_period_rules(&self, date: NaiveDate) -> bool {
        self.period.need_to_execute(date)
    }

    /// Run the whole backup, recording the outcome on the entity
    ///
    /// Never fails: errors end up in [`status`](Self::status) and
    /// [`error`](Self::error). The working directory is removed whatever
    /// the outcome.
    pub async fn backup(&mut self, settings: &EntitySettings, run: DateTime<Local>) {
        let span = info_span!("entity", id = %self.id, oid = %self.oid());
        self.start_time = Some(Local::now());

        let result = self.run_backup(settings, run).instrument(span.clone()).await;

        self.end_time = Some(Local::now());
        let _enter = span.enter();
        match result {
            Ok(()) => {
                info!(paths = self.backup_paths.len(), "backup finished");
                self.status = Some(EntityStatus::Success);
            }
            Err(err) => {
                error!(error = %err, "backup failed");
                self.status = Some(EntityStatus::Error);
                self.error = Some(err);
            }
        }
    }

    async fn run_backup(&mut self, settings: &EntitySettings, run: DateTime<Local>) -> Result<()> {
        let workdir = WorkDir::prepare(&settings.temp_dir, &self.oid()).await?;
        let result = self.run_steps(workdir.path(), settings, run).await;
        workdir.release().await;
        result
    }

    async fn run_steps(&mut self, workdir: &Path, settings: &EntitySettings, run: DateTime<Local>) -> Result<()> {
        let ctx = CaptureContext {
            tools: &settings.tools,
            runner: &settings.runner,
            compress: self.compress,
        };

        let output = self.source.capture(workdir, &ctx).await?;
        self.source_size = output.source_size;
        self.backup_size = output.backup_size;
        if output.artifacts.is_empty() {
            return Err(BackupError::NoArtifacts(workdir.display().to_string()));
        }
        self.backup_files = output.artifacts;

        let Distribution { written, failures } = distribute(
            &self.id,
            &self.backup_files,
            &self.managers,
            run.date_naive(),
            settings.write_timeout,
        )
        .await;
        self.backup_paths = written;
        if !failures.is_empty() {
            return Err(BackupError::Distribution(failures));
        }

        let cleanup = clear_old_copies(&self.id, &self.oid(), &self.managers, self.keep).await;
        self.removed_paths = cleanup.removed;
        if !cleanup.failures.is_empty() {
            return Err(BackupError::Retention(cleanup.failures));
        }

        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn oid(&self) -> String {
        self.source.oid()
    }

    pub fn source(&self) -> &EntitySource {
        &self.source
    }

    pub fn managers(&self) -> &[Arc<dyn StorageManager>] {
        &self.managers
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Set once the entity has run; `None` means it was skipped
    pub fn status(&self) -> Option<EntityStatus> {
        self.status
    }

    pub fn error(&self) -> Option<&BackupError> {
        self.error.as_ref()
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.end_time
    }

    pub fn source_size(&self) -> u64 {
        self.source_size
    }

    pub fn backup_size(&self) -> u64 {
        self.backup_size
    }

    /// Local artifacts of the last run, already deleted once it finished
    pub fn backup_files(&self) -> &[PathBuf] {
        &self.backup_files
    }

    /// Locations written on the storage managers
    pub fn backup_paths(&self) -> &[String] {
        &self.backup_paths
    }

    pub fn removed_paths(&self) -> &[String] {
        &self.removed_paths
    }
}
