//! The backup process: hooks, the entity loop and closing storage managers

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::backup::{BackupEntity, EntitySettings, build_entities, join_errors};
use crate::capture::CommandRunner;
use crate::capture::exec::{CommandError, split_command_line};
use crate::config::{ConfigError, Events, ProcessConfig};
use crate::database::DatabaseManagers;
use crate::storage::{ManagerError, StorageRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("could not close storage managers: {}", join_errors(.0))]
    Close(Vec<ManagerError>),
}

/// A failed hook command; recorded, never fatal
#[derive(Debug, thiserror::Error)]
#[error("{stage} hook '{command}': {source}")]
pub struct HookFailure {
    pub stage: &'static str,
    pub command: String,
    #[source]
    pub source: CommandError,
}

pub struct Process {
    volumes: StorageRegistry,
    entities: Vec<BackupEntity>,
    settings: EntitySettings,
    events: Events,
    run_time: Option<DateTime<Local>>,
    hook_failures: Vec<HookFailure>,
    closed: bool,
}

impl Process {
    /// Open storage volumes, resolve database managers and build entities
    pub async fn init(config: ProcessConfig) -> Result<Self, ProcessError> {
        debug!("initializing volumes");
        let clients = config.volume_client_configs()?;
        let volumes = StorageRegistry::from_configs(&clients)
            .await
            .map_err(ConfigError::from)?;

        Self::with_volumes(config, volumes).await
    }

    /// Build entities on already opened volumes
    ///
    /// The volumes are closed when the configuration turns out to be invalid.
    pub async fn with_volumes(config: ProcessConfig, volumes: StorageRegistry) -> Result<Self, ProcessError> {
        let built = DatabaseManagers::from_configs(&config.database_managers)
            .and_then(|databases| build_entities(&config.tasks, &volumes, &databases));
        let entities = match built {
            Ok(entities) => entities,
            Err(err) => {
                for failure in close_managers(&volumes).await {
                    warn!(error = %failure, "closing volume after failed initialization");
                }
                return Err(err.into());
            }
        };
        info!(volumes = volumes.len(), entities = entities.len(), "process initialized");

        let settings = EntitySettings {
            temp_dir: config.transitory_dir(),
            tools: config.tool_paths(),
            runner: CommandRunner::new(config.environments.clone(), config.timeouts.command()),
            write_timeout: config.timeouts.write(),
        };

        Ok(Self::new(volumes, entities, settings, config.events))
    }

    pub fn new(volumes: StorageRegistry, entities: Vec<BackupEntity>, settings: EntitySettings, events: Events) -> Self {
        Self {
            volumes,
            entities,
            settings,
            events,
            run_time: None,
            hook_failures: Vec::new(),
            closed: false,
        }
    }

    /// Run every due entity at the current time, then close the volumes
    pub async fn execute(&mut self) -> Result<(), ProcessError> {
        self.execute_at(Local::now()).await
    }

    /// Run every entity due on `run`, then close the volumes
    ///
    /// Only close failures are returned; entity and hook failures are kept
    /// on the entities and in [`hook_failures`](Self::hook_failures).
    pub async fn execute_at(&mut self, run: DateTime<Local>) -> Result<(), ProcessError> {
        let before_start = self.events.before_start.clone();
        self.run_hooks("beforeStart", &before_start).await;

        self.run_time = Some(run);
        let date = run.date_naive();
        for entity in &mut self.entities {
            if !entity.check_period_rules(date) {
                debug!(id = %entity.id(), oid = %entity.oid(), "not due, skipping");
                continue;
            }

            let started = Instant::now();
            info!(id = %entity.id(), oid = %entity.oid(), "start backup");
            entity.backup(&self.settings, run).await;
            match entity.error() {
                None => info!(id = %entity.id(), elapsed = ?started.elapsed(), "backup done"),
                Some(err) => error!(id = %entity.id(), elapsed = ?started.elapsed(), error = %err, "backup failed"),
            }
        }

        let before_finish = self.events.before_finish.clone();
        self.run_hooks("beforeFinish", &before_finish).await;

        self.close().await
    }

    async fn run_hooks(&mut self, stage: &'static str, commands: &[String]) {
        for line in commands {
            let Some((program, args)) = split_command_line(line) else {
                continue;
            };

            debug!(stage, command = %line, "running hook");
            if let Err(source) = self.settings.runner.run(Path::new(program), args, &[]).await {
                warn!(stage, command = %line, error = %source, "hook failed");
                self.hook_failures.push(HookFailure {
                    stage,
                    command: line.clone(),
                    source,
                });
            }
        }
    }

    /// Close every storage manager once; later calls do nothing
    pub async fn close(&mut self) -> Result<(), ProcessError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let failures = close_managers(&self.volumes).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProcessError::Close(failures))
        }
    }

    pub fn entities(&self) -> &[BackupEntity] {
        &self.entities
    }

    pub fn run_time(&self) -> Option<DateTime<Local>> {
        self.run_time
    }

    pub fn hook_failures(&self) -> &[HookFailure] {
        &self.hook_failures
    }
}

async fn close_managers(volumes: &StorageRegistry) -> Vec<ManagerError> {
    let mut failures = Vec::new();
    for (id, manager) in volumes.iter() {
        if let Err(source) = manager.close().await {
            failures.push(ManagerError {
                manager: id.to_string(),
                source,
            });
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{EntitySource, EntityStatus};
    use crate::capture::FileCapture;
    use crate::capture::file::FileFilter;
    use crate::schedule::{PeriodRule, WeekdaysRule};
    use crate::storage::local_storage::LocalStorageManager;
    use crate::storage::{MockStorageManager, StorageDescription, StorageError, StorageKind, StorageManager};
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::tempdir;

    // Thursday
    fn run_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 4, 3, 0, 0).unwrap()
    }

    fn entity(source: &Path, weekdays: &[u32], managers: Vec<Arc<dyn StorageManager>>) -> BackupEntity {
        BackupEntity::new(
            "docs",
            EntitySource::Files(FileCapture::new(source, FileFilter::default())),
            PeriodRule::daily(WeekdaysRule::new(weekdays).unwrap()),
            managers,
            3,
            false,
        )
    }

    fn closing_mock(id: &'static str, result: fn() -> Result<(), StorageError>) -> MockStorageManager {
        let mut mock = MockStorageManager::new();
        mock.expect_describe().returning(move || StorageDescription {
            id: id.into(),
            kind: StorageKind::S3,
            location: "nowhere".into(),
        });
        mock.expect_close().times(1).returning(move || result());
        mock
    }

    #[tokio::test]
    async fn test_due_entities_run_and_others_are_skipped() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("documents");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"a").unwrap();

        let disk: Arc<dyn StorageManager> = Arc::new(LocalStorageManager::new("disk", temp_dir.path().join("storage")));
        let mut volumes = StorageRegistry::default();
        volumes.insert("disk".into(), Arc::clone(&disk)).unwrap();

        let entities = vec![
            entity(&source, &[4], vec![Arc::clone(&disk)]),
            entity(&source, &[1], vec![Arc::clone(&disk)]),
        ];
        let settings = EntitySettings {
            temp_dir: temp_dir.path().join("work"),
            ..EntitySettings::default()
        };
        let mut process = Process::new(volumes, entities, settings, Events::default());

        process.execute_at(run_time()).await.unwrap();

        assert_eq!(process.run_time(), Some(run_time()));
        assert_eq!(process.entities()[0].status(), Some(EntityStatus::Success));
        assert_eq!(process.entities()[1].status(), None);
        assert!(process.entities()[1].start_time().is_none());
    }

    #[tokio::test]
    async fn test_close_errors_are_joined_and_close_happens_once() {
        let mut volumes = StorageRegistry::default();
        volumes
            .insert("good".into(), Arc::new(closing_mock("good", || Ok(()))))
            .unwrap();
        volumes
            .insert("bad".into(), Arc::new(closing_mock("bad", || Err(StorageError::S3("session lost".into())))))
            .unwrap();

        let mut process = Process::new(volumes, Vec::new(), EntitySettings::default(), Events::default());

        let err = process.execute_at(run_time()).await.unwrap_err();
        match &err {
            ProcessError::Close(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].manager, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }
        // a second close does not reach the managers again
        process.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_hook_failures_are_recorded_and_run_continues() {
        let temp_dir = tempdir().unwrap();
        let marker = temp_dir.path().join("finished");
        let events = Events {
            before_start: vec!["false".into(), "   ".into()],
            before_finish: vec![format!("touch {}", marker.display())],
        };

        let mut process = Process::new(StorageRegistry::default(), Vec::new(), EntitySettings::default(), events);
        process.execute_at(run_time()).await.unwrap();

        assert_eq!(process.hook_failures().len(), 1);
        assert_eq!(process.hook_failures()[0].stage, "beforeStart");
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_init_from_config() {
        let temp_dir = tempdir().unwrap();
        let yaml = format!(
            r#"
catalogs:
  transitory: {work}
volumes:
  - id: disk
    type: local
    root: {storage}
tasks:
  - id: docs
    type: daily
    repeat: [1, 2, 3, 4, 5, 6, 7]
    files:
      - path: {source}
    volumes: [disk, missing]
    keepCopies: 2
"#,
            work = temp_dir.path().join("work").display(),
            storage = temp_dir.path().join("storage").display(),
            source = temp_dir.path().join("documents").display(),
        );

        let config = ProcessConfig::from_yaml(&yaml).unwrap();
        let process = Process::init(config).await.unwrap();

        assert_eq!(process.entities().len(), 1);
        assert_eq!(process.entities()[0].managers().len(), 1);
        assert_eq!(process.entities()[0].oid(), "documents");
    }

    #[tokio::test]
    async fn test_volumes_are_closed_when_initialization_fails() {
        let mut volumes = StorageRegistry::default();
        volumes
            .insert("cloud".into(), Arc::new(closing_mock("cloud", || Ok(()))))
            .unwrap();
        let config = ProcessConfig::from_yaml(
            r#"
tasks:
  - id: acct
    type: daily
    repeat: [1]
    volumes: [cloud]
    dbs:
      - name: acct
        manager: nowhere
"#,
        )
        .unwrap();

        let result = Process::with_volumes(config, volumes).await;

        assert!(matches!(
            result,
            Err(ProcessError::Config(ConfigError::UnknownDatabaseManager(_)))
        ));
    }

    #[tokio::test]
    async fn test_init_rejects_unknown_database_manager() {
        let config = ProcessConfig::from_yaml(
            r#"
tasks:
  - id: acct
    type: daily
    repeat: [1]
    dbs:
      - name: acct
        manager: nowhere
"#,
        )
        .unwrap();

        assert!(matches!(
            Process::init(config).await,
            Err(ProcessError::Config(ConfigError::UnknownDatabaseManager(_)))
        ));
    }
}
