//! PostgreSQL database capture
//!
//! The dump is a `pg_dump` directory-format export in `<staging>/logical`.
//! Tables larger than [`LARGE_TABLE_BYTES`] are dumped without their data,
//! which is instead exported with a binary `\COPY` into `<staging>/binary`.

use std::ffi::OsString;
use std::path::Path;

use sqlx::Connection;
use sqlx::postgres::PgConnection;
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};

use super::{CaptureContext, CaptureError, CaptureOutput, Result, package};
use crate::database::DatabaseManager;

/// Tables above this total relation size get a separate binary copy
pub const LARGE_TABLE_BYTES: i64 = 1_073_741_824;

const SYSTEM_DATABASE: &str = "postgres";

const DUMP_ERROR_MARKERS: [&str; 2] = ["pg_dump: ошибка:", "pg_dump: error:"];

const LARGE_TABLES_SQL: &str = r#"
SELECT table_name
FROM (
    SELECT table_name, pg_total_relation_size(table_name::regclass) AS total_size
    FROM (
        SELECT quote_ident(table_schema) || '.' || quote_ident(table_name) AS table_name
        FROM information_schema.tables
        WHERE table_type = 'BASE TABLE'
          AND table_schema NOT IN ('pg_catalog', 'information_schema')
    ) AS all_tables
) AS sizes
WHERE total_size > $1
ORDER BY total_size DESC
"#;

#[derive(Debug, Clone)]
pub struct PostgresCapture {
    database: String,
    server: DatabaseManager,
}

impl PostgresCapture {
    pub fn new(database: impl Into<String>, server: DatabaseManager) -> Self {
        Self {
            database: database.into(),
            server,
        }
    }

    /// The database name
    pub fn oid(&self) -> String {
        self.database.clone()
    }

    pub async fn capture(&self, workdir: &Path, ctx: &CaptureContext<'_>) -> Result<CaptureOutput> {
        self.ensure_exists().await?;
        let (source_size, large_tables) = self.inspect().await?;
        if !large_tables.is_empty() {
            info!(tables = ?large_tables, "large tables are copied separately");
        }

        let staging = workdir.join(&self.database);
        let logical = staging.join("logical");
        tokio_fs::create_dir_all(&staging).await?;

        let args = dump_args(&self.server, &self.database, &logical, dump_jobs(), &large_tables);
        let password = [("PGPASSWORD", self.server.password.as_str())];
        let output = ctx.runner.run(&ctx.tools.pg_dump, args, &password).await?;

        let errors = find_dump_errors(&output.stderr);
        if !errors.is_empty() {
            return Err(CaptureError::DumpLog(errors.join("\n")));
        }

        if !large_tables.is_empty() {
            let binary = staging.join("binary");
            tokio_fs::create_dir_all(&binary).await?;
            for table in &large_tables {
                let args = copy_args(&self.server, &self.database, table, &binary.join(table));
                ctx.runner.run(&ctx.tools.psql, args, &password).await?;
            }
        }

        let (artifacts, backup_size) = package(workdir, &self.database, ctx).await?;
        Ok(CaptureOutput {
            artifacts,
            source_size,
            backup_size,
        })
    }

    async fn ensure_exists(&self) -> Result<()> {
        let options = self.server.connect_options(SYSTEM_DATABASE);
        let mut conn = PgConnection::connect_with(&options).await?;

        let found: Option<String> = sqlx::query_scalar("SELECT datname FROM pg_database WHERE datname = $1")
            .bind(&self.database)
            .fetch_optional(&mut conn)
            .await?;
        conn.close().await?;

        match found {
            Some(_) => Ok(()),
            None => Err(CaptureError::DatabaseNotFound(self.database.clone())),
        }
    }

    /// Database size and the tables whose data is copied separately
    async fn inspect(&self) -> Result<(u64, Vec<String>)> {
        let options = self.server.connect_options(&self.database);
        let mut conn = PgConnection::connect_with(&options).await?;

        let size: i64 = sqlx::query_scalar("SELECT pg_database_size($1)")
            .bind(&self.database)
            .fetch_one(&mut conn)
            .await?;
        let tables: Vec<String> = sqlx::query_scalar(LARGE_TABLES_SQL)
            .bind(LARGE_TABLE_BYTES)
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;

        debug!(database = %self.database, size, "inspected database");
        Ok((u64::try_from(size).unwrap_or_default(), tables))
    }
}

/// A quarter of the CPUs, at least one
fn dump_jobs() -> usize {
    (num_cpus::get() / 4).max(1)
}

fn connection_args(server: &DatabaseManager, database: &str) -> Vec<OsString> {
    vec![
        "--host".into(),
        server.host.clone().into(),
        "--port".into(),
        server.port.to_string().into(),
        "--username".into(),
        server.user.clone().into(),
        "--no-password".into(),
        "--dbname".into(),
        database.into(),
    ]
}

fn dump_args(server: &DatabaseManager, database: &str, dest: &Path, jobs: usize, exclude_data: &[String]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--format".into(),
        "directory".into(),
        "--jobs".into(),
        jobs.to_string().into(),
        "--blobs".into(),
        "--encoding".into(),
        "UTF8".into(),
        "--verbose".into(),
        "--file".into(),
        dest.as_os_str().to_owned(),
    ];
    args.extend(connection_args(server, database));
    for table in exclude_data {
        args.push("--exclude-table-data".into());
        args.push(table.into());
    }
    args
}

fn copy_args(server: &DatabaseManager, database: &str, table: &str, dest: &Path) -> Vec<OsString> {
    let target = dest.display().to_string().replace('\'', "''");
    let mut args = connection_args(server, database);
    args.push("--command".into());
    args.push(format!("\\COPY {table} TO '{target}' WITH BINARY;").into());
    args
}

/// Lines of a pg_dump log that report an error
fn find_dump_errors(log: &str) -> Vec<String> {
    let errors: Vec<String> = log
        .lines()
        .filter(|line| DUMP_ERROR_MARKERS.iter().any(|marker| line.contains(marker)))
        .map(str::to_string)
        .collect();
    if !errors.is_empty() {
        warn!(count = errors.len(), "pg_dump log contains errors");
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseInterface;

    fn server() -> DatabaseManager {
        DatabaseManager {
            name: "pgsql".into(),
            host: "db.local".into(),
            port: 5433,
            user: "backup".into(),
            password: "secret".into(),
            interface: DatabaseInterface::Postgres,
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_dump_args() {
        let args = strings(&dump_args(
            &server(),
            "acct",
            Path::new("/tmp/acct/logical"),
            2,
            &["public.events".to_string()],
        ));

        assert_eq!(&args[..4], ["--format", "directory", "--jobs", "2"]);
        assert!(args.windows(2).any(|w| w == ["--file", "/tmp/acct/logical"]));
        assert!(args.windows(2).any(|w| w == ["--dbname", "acct"]));
        assert!(args.windows(2).any(|w| w == ["--port", "5433"]));
        assert!(args.contains(&"--no-password".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--exclude-table-data", "public.events"]);
        assert!(!args.iter().any(|a| a.contains("secret")));
    }

    #[test]
    fn test_copy_args() {
        let args = strings(&copy_args(&server(), "acct", "public.events", Path::new("/tmp/it's/events")));
        assert_eq!(
            args.last().unwrap(),
            "\\COPY public.events TO '/tmp/it''s/events' WITH BINARY;"
        );
    }

    #[test]
    fn test_find_dump_errors() {
        let log = "pg_dump: reading extensions\n\
                   pg_dump: error: query failed: permission denied\n\
                   pg_dump: ошибка: нет доступа\n\
                   pg_dump: finished";

        let errors = find_dump_errors(log);
        assert_eq!(errors.len(), 2);
        assert!(find_dump_errors("pg_dump: dumping contents of table").is_empty());
    }

    #[test]
    fn test_dump_jobs_at_least_one() {
        assert!(dump_jobs() >= 1);
    }
}
