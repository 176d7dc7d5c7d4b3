//! Subscriber setup for the binaries
//!
//! Library code only emits `tracing` events; the binaries pick the format
//! and destination here. `RUST_LOG` overrides the level of every environment.

use std::path::Path;
use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogEnvironment {
    /// Human readable text at debug level
    #[default]
    Local,
    /// JSON lines at debug level
    Debug,
    /// JSON lines at info level
    Production,
}

impl LogEnvironment {
    fn default_level(self) -> &'static str {
        match self {
            Self::Local | Self::Debug => "debug",
            Self::Production => "info",
        }
    }

    fn json(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl FromStr for LogEnvironment {
    type Err = std::convert::Infallible;

    /// Unrecognised names fall back to `Local`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "debug" | "dev" => Self::Debug,
            "prod" | "production" => Self::Production,
            _ => Self::Local,
        })
    }
}

fn env_filter(env: LogEnvironment) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env.default_level()))
}

/// Install the global subscriber
///
/// With `log_file` set, output goes to a daily rolled file through a
/// background writer; keep the returned guard alive until exit so buffered
/// lines get flushed. Without it, output goes to stdout.
pub fn init_logging(env: LogEnvironment, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let (writer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "backilli.log".into());
            let appender = tracing_appender::rolling::daily(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = fmt().with_env_filter(env_filter(env)).with_writer(writer);
    let installed = if env.json() {
        builder.json().with_ansi(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    if let Err(err) = installed {
        eprintln!("logging is already initialized: {err}");
    }

    guard
}
