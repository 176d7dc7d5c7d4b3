//! Database servers backups can be taken from

use std::collections::HashMap;
use std::fmt;

use sqlx::postgres::PgConnectOptions;

use crate::config::{ConfigError, DatabaseManagerConfig, Result};

const DEFAULT_POSTGRES_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseInterface {
    Postgres,
}

impl DatabaseInterface {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "pgsql" | "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigError::UnsupportedDatabaseInterface(other.to_string())),
        }
    }
}

/// Connection credentials of one database server
#[derive(Clone, PartialEq)]
pub struct DatabaseManager {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub interface: DatabaseInterface,
}

impl fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("interface", &self.interface)
            .finish()
    }
}

impl DatabaseManager {
    pub fn from_config(conf: &DatabaseManagerConfig) -> Result<Self> {
        Ok(Self {
            name: conf.name.clone(),
            host: if conf.host.is_empty() { "localhost".to_string() } else { conf.host.clone() },
            port: if conf.port == 0 { DEFAULT_POSTGRES_PORT } else { conf.port },
            user: conf.user.clone(),
            password: conf.password.clone(),
            interface: DatabaseInterface::parse(&conf.interface)?,
        })
    }

    /// Connection options for `database` on this server
    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
    }
}

/// Database managers keyed by name
#[derive(Debug, Clone, Default)]
pub struct DatabaseManagers {
    managers: HashMap<String, DatabaseManager>,
}

impl DatabaseManagers {
    pub fn from_configs(confs: &[DatabaseManagerConfig]) -> Result<Self> {
        let managers = confs
            .iter()
            .map(|conf| DatabaseManager::from_config(conf).map(|m| (m.name.clone(), m)))
            .collect::<Result<_>>()?;
        Ok(Self { managers })
    }

    pub fn get(&self, name: &str) -> Option<&DatabaseManager> {
        self.managers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(interface: &str) -> DatabaseManagerConfig {
        DatabaseManagerConfig {
            name: "pgsql".into(),
            host: String::new(),
            port: 0,
            user: "postgres".into(),
            password: "secret".into(),
            interface: interface.into(),
        }
    }

    #[test]
    fn test_defaults_and_lookup() {
        let managers = DatabaseManagers::from_configs(&[conf("pgsql")]).unwrap();
        let manager = managers.get("pgsql").unwrap();

        assert_eq!(manager.host, "localhost");
        assert_eq!(manager.port, 5432);
        assert_eq!(manager.interface, DatabaseInterface::Postgres);
        assert!(managers.get("mysql").is_none());
    }

    #[test]
    fn test_unsupported_interface() {
        assert!(matches!(
            DatabaseManagers::from_configs(&[conf("mssql")]),
            Err(ConfigError::UnsupportedDatabaseInterface(_))
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let manager = DatabaseManager::from_config(&conf("pgsql")).unwrap();
        let printed = format!("{manager:?}");
        assert!(!printed.contains("secret"));
    }
}
