//! Building backup entities from task definitions

use std::sync::Arc;

use tracing::{debug, warn};

use super::entity::{BackupEntity, EntitySource};
use crate::capture::file::{FileFilter, source_name};
use crate::capture::{FileCapture, PostgresCapture};
use crate::config::{ConfigError, Result, TaskConfig};
use crate::database::DatabaseManagers;
use crate::schedule::{MonthRule, PartOfMonth, PeriodRule, WeekdaysRule};
use crate::storage::{StorageManager, StorageRegistry};

/// Recurrence rule of a task
pub fn period_rule(task: &TaskConfig) -> Result<PeriodRule> {
    match task.kind.trim().to_lowercase().as_str() {
        "daily" => Ok(PeriodRule::daily(WeekdaysRule::new(&task.repeat)?)),
        "monthly" => {
            let part: PartOfMonth = task.part_of_month.as_deref().unwrap_or_default().parse()?;
            Ok(PeriodRule::monthly(MonthRule::new(part, &task.exclude_months)?))
        }
        other => Err(ConfigError::UnknownPeriod(other.to_string())),
    }
}

/// Storage managers of a task; unknown volume ids are skipped
fn task_managers(task: &TaskConfig, volumes: &StorageRegistry) -> Vec<Arc<dyn StorageManager>> {
    task.volumes
        .iter()
        .filter_map(|id| {
            let manager = volumes.get(id);
            if manager.is_none() {
                warn!(task = %task.id, volume = %id, "volume is not defined, skipping");
            }
            manager
        })
        .collect()
}

/// One entity per database and per file entry of every task, in order
pub fn build_entities(
    tasks: &[TaskConfig],
    volumes: &StorageRegistry,
    databases: &DatabaseManagers,
) -> Result<Vec<BackupEntity>> {
    let mut entities = Vec::new();

    for task in tasks {
        let period = period_rule(task)?;
        let managers = task_managers(task, volumes);
        if managers.is_empty() {
            warn!(task = %task.id, "task has no storage volumes");
        }

        for db in &task.dbs {
            let server = databases
                .get(&db.manager)
                .ok_or_else(|| ConfigError::UnknownDatabaseManager(db.manager.clone()))?;
            let source = EntitySource::Postgres(PostgresCapture::new(&db.name, server.clone()));
            entities.push(BackupEntity::new(
                &task.id,
                source,
                period.clone(),
                managers.clone(),
                task.keep_copies,
                task.compress,
            ));
        }

        for file in &task.files {
            if source_name(&file.path).is_none() {
                return Err(ConfigError::InvalidSourcePath(file.path.clone()));
            }
            let filter = FileFilter::new(file.include_regexp.as_deref(), file.exclude_regexp.as_deref())?;
            let source = EntitySource::Files(FileCapture::new(&file.path, filter));
            entities.push(BackupEntity::new(
                &task.id,
                source,
                period.clone(),
                managers.clone(),
                task.keep_copies,
                task.compress,
            ));
        }

        debug!(task = %task.id, total = entities.len(), "entities built");
    }

    Ok(entities)
}
