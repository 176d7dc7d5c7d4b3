//! Capture adapters turning a backup source into local artifact files.
//!
//! Every adapter stages the source inside the entity's working directory
//! under `<workdir>/<oid>`, then packages the staging directory into
//! `<workdir>/<oid>.tar` or, when compression is enabled, a zip archive
//! split into 512 MiB volumes. The artifacts are all files of the working
//! directory named `<oid>.*`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs as tokio_fs;
use tracing::debug;

use crate::config::ToolPaths;

pub mod exec;
pub mod file;
pub mod postgres;

pub use exec::{CommandError, CommandRunner};
pub use file::FileCapture;
pub use postgres::PostgresCapture;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database '{0}' does not exist")]
    DatabaseNotFound(String),

    #[error("pg_dump reported errors: {0}")]
    DumpLog(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// What a capture produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureOutput {
    pub artifacts: Vec<PathBuf>,
    pub source_size: u64,
    pub backup_size: u64,
}

/// Shared inputs of every capture
#[derive(Debug, Clone, Copy)]
pub struct CaptureContext<'a> {
    pub tools: &'a ToolPaths,
    pub runner: &'a CommandRunner,
    pub compress: bool,
}

/// Package `<workdir>/<oid>` and return the resulting artifacts
pub async fn package(workdir: &Path, oid: &str, ctx: &CaptureContext<'_>) -> Result<(Vec<PathBuf>, u64)> {
    let staging = workdir.join(oid);

    if ctx.compress {
        let archive = workdir.join(format!("{oid}.zip"));
        let args: [OsString; 6] = [
            "a".into(),
            "-tzip".into(),
            "-v512m".into(),
            "-mx5".into(),
            archive.into_os_string(),
            staging.clone().into_os_string(),
        ];
        ctx.runner.run(&ctx.tools.archiver, args, &[]).await?;
    } else {
        let archive = workdir.join(format!("{oid}.tar"));
        let (staging, name) = (staging.clone(), oid.to_string());
        tokio::task::spawn_blocking(move || write_tar(&staging, &archive, &name)).await??;
    }

    tokio_fs::remove_dir_all(&staging).await?;
    collect_artifacts(workdir, oid).await
}

fn write_tar(staging: &Path, archive: &Path, name: &str) -> std::io::Result<()> {
    let file = std::fs::File::create(archive)?;
    let mut builder = tar::Builder::new(file);
    builder.append_dir_all(name, staging)?;
    builder.into_inner()?.sync_all()
}

/// Files of `workdir` named `<oid>.*`, sorted, with their total size
pub async fn collect_artifacts(workdir: &Path, oid: &str) -> Result<(Vec<PathBuf>, u64)> {
    let prefix = format!("{oid}.");
    let mut entries = tokio_fs::read_dir(workdir).await?;
    let mut artifacts = Vec::new();
    let mut total = 0;

    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_file() && entry.file_name().to_string_lossy().starts_with(&prefix) {
            total += meta.len();
            artifacts.push(entry.path());
        }
    }

    artifacts.sort();
    debug!(count = artifacts.len(), bytes = total, "collected artifacts");
    Ok((artifacts, total))
}
