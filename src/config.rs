//! Process configuration loaded from a YAML file.
//!
//! The file describes storage volumes, database servers, backup tasks,
//! external tool locations and the hooks run around a backup process.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::storage::{ClientConfig, StorageError, StorageKind};

const DEFAULT_SMB_PORT: u16 = 445;
const YANDEX_ENDPOINT: &str = "https://storage.yandexcloud.net";
const YANDEX_REGION: &str = "ru-central1";
const DEFAULT_S3_REGION: &str = "us-east-1";

/// Configuration error type, fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unexpected type of period '{0}'")]
    UnknownPeriod(String),

    #[error("unknown part of month '{0}'")]
    UnknownPartOfMonth(String),

    #[error("weekday {0} is out of range 1..=7")]
    InvalidWeekday(u32),

    #[error("month {0} is out of range 1..=12")]
    InvalidMonth(u32),

    #[error("unexpected type of volume '{0}'")]
    UnknownVolumeType(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("database manager '{0}' is not defined")]
    UnknownDatabaseManager(String),

    #[error("unsupported database interface '{0}'")]
    UnsupportedDatabaseInterface(String),

    #[error("file source '{}' has no final name", .0.display())]
    InvalidSourcePath(PathBuf),

    #[error("could not compile {kind} regexp '{pattern}': {source}")]
    Regex {
        kind: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for configuration handling
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root of the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Variables passed to every external command
    #[serde(alias = "enviroments")]
    pub environments: HashMap<String, String>,
    #[serde(alias = "dbms_managers")]
    pub database_managers: Vec<DatabaseManagerConfig>,
    pub catalogs: Catalogs,
    pub volumes: Vec<VolumeConfig>,
    pub external_tool: ExternalTools,
    pub tasks: Vec<TaskConfig>,
    pub events: Events,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Catalogs {
    /// Where reports are written
    pub assets: Option<PathBuf>,
    /// Root of the per-entity working directories
    pub transitory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    pub domain: String,
    pub user: String,
    pub password: String,
    #[serde(alias = "mount_point")]
    pub mountpoint: String,
    pub key_id: String,
    pub key_secret: String,
    pub bucket_name: String,
    pub root: String,
    pub region: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExternalTools {
    pub postgresql: PostgresqlTools,
    #[serde(alias = "compessing")]
    pub compressing: CompressingTools,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostgresqlTools {
    pub psql: Option<String>,
    pub dump: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompressingTools {
    #[serde(rename = "7z")]
    pub zip: Option<String>,
}

/// Locations of the external programs used by capture adapters
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPaths {
    pub pg_dump: PathBuf,
    pub psql: PathBuf,
    pub archiver: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pg_dump: PathBuf::from("pg_dump"),
            psql: PathBuf::from("psql"),
            archiver: PathBuf::from("7z"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub part_of_month: Option<String>,
    pub repeat: Vec<u32>,
    pub exclude_months: Vec<u32>,
    #[serde(alias = "databases")]
    pub dbs: Vec<DatabaseRef>,
    pub files: Vec<FileRule>,
    pub compress: bool,
    pub volumes: Vec<String>,
    #[serde(rename = "keepCopies", alias = "keep")]
    pub keep_copies: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseRef {
    pub name: String,
    pub manager: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileRule {
    pub path: PathBuf,
    pub include_regexp: Option<String>,
    pub exclude_regexp: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseManagerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub interface: String,
}

/// External commands run around the backup loop
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Events {
    #[serde(rename = "beforeStart", alias = "before_start")]
    pub before_start: Vec<String>,
    #[serde(rename = "beforeFinish", alias = "before_finish")]
    pub before_finish: Vec<String>,
}

/// Optional deadlines; absent values mean no deadline at all
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub command_secs: Option<u64>,
    pub write_secs: Option<u64>,
}

impl Timeouts {
    pub fn command(&self) -> Option<Duration> {
        self.command_secs.map(Duration::from_secs)
    }

    pub fn write(&self) -> Option<Duration> {
        self.write_secs.map(Duration::from_secs)
    }
}

impl ProcessConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn tool_paths(&self) -> ToolPaths {
        let defaults = ToolPaths::default();
        let pick = |value: &Option<String>, default: PathBuf| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        ToolPaths {
            pg_dump: pick(&self.external_tool.postgresql.dump, defaults.pg_dump),
            psql: pick(&self.external_tool.postgresql.psql, defaults.psql),
            archiver: pick(&self.external_tool.compressing.zip, defaults.archiver),
        }
    }

    /// Root for working directories, the system temp dir when unset
    pub fn transitory_dir(&self) -> PathBuf {
        self.catalogs
            .transitory
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(env::temp_dir)
    }

    /// Convert every volume definition into a storage client config
    pub fn volume_client_configs(&self) -> Result<Vec<ClientConfig>> {
        self.volumes.iter().map(VolumeConfig::client_config).collect()
    }
}

impl VolumeConfig {
    pub fn client_config(&self) -> Result<ClientConfig> {
        let kind = match self.kind.trim().to_lowercase().as_str() {
            "local" => StorageKind::Local,
            "smb" => StorageKind::Smb,
            "yandex.storage" | "s3" => StorageKind::S3,
            other => return Err(ConfigError::UnknownVolumeType(other.to_string())),
        };

        let mut conf = ClientConfig {
            id: self.id.clone(),
            kind,
            root: self.root.clone(),
            domain: self.domain.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            mount_point: PathBuf::from(&self.mountpoint),
            bucket_name: self.bucket_name.clone(),
            ..ClientConfig::default()
        };

        match kind {
            StorageKind::Local => {}
            StorageKind::Smb => {
                let (host, port) = parse_socket(&self.address)?;
                conf.host = host;
                conf.port = port;
            }
            StorageKind::S3 => {
                conf.key_id = credential(&self.key_id, "AWS_ACCESS_KEY_ID")?;
                conf.key_secret = credential(&self.key_secret, "AWS_SECRET_ACCESS_KEY")?;

                let yandex = self.kind.eq_ignore_ascii_case("yandex.storage");
                conf.region = match (self.region.is_empty(), yandex) {
                    (false, _) => self.region.clone(),
                    (true, true) => YANDEX_REGION.to_string(),
                    (true, false) => DEFAULT_S3_REGION.to_string(),
                };
                conf.endpoint = match (self.endpoint.is_empty(), yandex) {
                    (false, _) => Some(self.endpoint.clone()),
                    (true, true) => Some(YANDEX_ENDPOINT.to_string()),
                    (true, false) => None,
                };
            }
        }

        Ok(conf)
    }
}

/// Split `host[:port]`, defaulting to the SMB port
fn parse_socket(address: &str) -> Result<(String, u16)> {
    match address.split_once(':') {
        None if !address.is_empty() => Ok((address.to_string(), DEFAULT_SMB_PORT)),
        None => Err(ConfigError::InvalidAddress(address.to_string())),
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(address.to_string()))?;
            Ok((host.to_string(), port))
        }
    }
}

/// Take a configured secret, or fall back to the environment
fn credential(configured: &str, env_key: &str) -> Result<String> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }
    env::var(env_key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential(env_key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
enviroments:
  PGCLIENTENCODING: UTF8
catalogs:
  assets: /var/lib/backilli
  transitory: /tmp/backilli
external_tool:
  postgresql:
    psql: /usr/bin/psql
    dump: /usr/bin/pg_dump
  compessing:
    7z: /usr/bin/7z
volumes:
  - id: disk
    type: local
    root: /mnt/backup
  - id: share
    type: smb
    address: 10.0.0.5
    mountpoint: /mnt/share
    root: backups
  - id: cloud
    type: yandex.storage
    key_id: key
    key_secret: secret
    bucket_name: archive
dbms_managers:
  - name: pgsql
    host: localhost
    port: 5432
    user: postgres
    password: secret
    interface: pgsql
tasks:
  - id: acct-db
    type: daily
    repeat: [1, 2, 3, 4, 5]
    dbs:
      - name: acct
        manager: pgsql
    compress: true
    volumes: [disk, cloud]
    keepCopies: 7
  - id: documents
    type: monthly
    part_of_month: finish
    exclude_months: [8]
    files:
      - path: /srv/documents
        exclude_regexp: '\.tmp$'
    volumes: [share]
    keepCopies: 3
events:
  beforeStart:
    - mount /mnt/share
  beforeFinish:
    - umount /mnt/share
timeouts:
  command_secs: 3600
"#;

    #[test]
    fn test_parse_sample() {
        let conf = ProcessConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(conf.environments.get("PGCLIENTENCODING").unwrap(), "UTF8");
        assert_eq!(conf.volumes.len(), 3);
        assert_eq!(conf.database_managers[0].port, 5432);
        assert_eq!(conf.tasks.len(), 2);
        assert_eq!(conf.tasks[0].keep_copies, 7);
        assert_eq!(conf.tasks[0].dbs[0].manager, "pgsql");
        assert_eq!(conf.tasks[1].part_of_month.as_deref(), Some("finish"));
        assert_eq!(
            conf.tasks[1].files[0].exclude_regexp.as_deref(),
            Some(r"\.tmp$")
        );
        assert_eq!(conf.events.before_start, vec!["mount /mnt/share"]);
        assert_eq!(conf.timeouts.command(), Some(Duration::from_secs(3600)));
        assert_eq!(conf.timeouts.write(), None);
        assert_eq!(conf.transitory_dir(), PathBuf::from("/tmp/backilli"));
    }

    #[test]
    fn test_tool_paths_defaults_and_overrides() {
        let conf = ProcessConfig::from_yaml(SAMPLE).unwrap();
        let tools = conf.tool_paths();
        assert_eq!(tools.pg_dump, PathBuf::from("/usr/bin/pg_dump"));
        assert_eq!(tools.archiver, PathBuf::from("/usr/bin/7z"));

        let empty = ProcessConfig::from_yaml("tasks: []").unwrap();
        assert_eq!(empty.tool_paths(), ToolPaths::default());
    }

    #[test]
    fn test_volume_client_configs() {
        let conf = ProcessConfig::from_yaml(SAMPLE).unwrap();
        let clients = conf.volume_client_configs().unwrap();

        assert_eq!(clients[0].kind, StorageKind::Local);
        assert_eq!(clients[1].kind, StorageKind::Smb);
        assert_eq!(clients[1].host, "10.0.0.5");
        assert_eq!(clients[1].port, 445);
        assert_eq!(clients[2].kind, StorageKind::S3);
        assert_eq!(clients[2].region, "ru-central1");
        assert_eq!(clients[2].endpoint.as_deref(), Some(YANDEX_ENDPOINT));
    }

    #[test]
    fn test_smb_address_with_port() {
        assert_eq!(
            parse_socket("fileserver:1445").unwrap(),
            ("fileserver".to_string(), 1445)
        );
        assert!(matches!(
            parse_socket("fileserver:smb"),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_unknown_volume_type() {
        let volume = VolumeConfig {
            id: "x".into(),
            kind: "ftp".into(),
            ..VolumeConfig::default()
        };
        assert!(matches!(
            volume.client_config(),
            Err(ConfigError::UnknownVolumeType(kind)) if kind == "ftp"
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ProcessConfig::from_yaml("tasks: [unclosed"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
