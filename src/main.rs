use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::{error, info, warn};

use backilli::config::ProcessConfig;
use backilli::logging::{LogEnvironment, init_logging};
use backilli::process::Process;
use backilli::report::{collect_reports, write_reports};

const EXIT_ARGS: u8 = 1;
const EXIT_CONFIG_MISSING: u8 = 2;
const EXIT_CONFIG_INVALID: u8 = 3;
const EXIT_INIT: u8 = 4;
const EXIT_CLOSE: u8 = 5;
const EXIT_REPORT: u8 = 6;

/// Run the scheduled backups described by a configuration file
#[derive(Parser, Debug)]
#[command(name = "backilli", version, about)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Write logs to this file, rolled daily
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Log profile: local, debug or prod
    #[arg(short, long, default_value = "local")]
    env: LogEnvironment,

    /// Load environment variables from a dotenv file
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Directory for the run report; defaults to the assets catalog
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_ARGS),
            };
        }
    };

    let _guard = init_logging(cli.env, cli.log.as_deref());

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run(cli: &Cli) -> Result<(), u8> {
    match &cli.env_file {
        Some(path) => {
            if let Err(err) = dotenv::from_path(path) {
                warn!(path = %path.display(), error = %err, "could not load env file");
            }
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    if !cli.config.is_file() {
        error!(path = %cli.config.display(), "configuration file not found");
        return Err(EXIT_CONFIG_MISSING);
    }
    let config = ProcessConfig::from_file(&cli.config).map_err(|err| {
        error!(path = %cli.config.display(), error = %err, "invalid configuration");
        EXIT_CONFIG_INVALID
    })?;

    let report_dir = report_dir(cli.report_dir.as_deref(), config.catalogs.assets.as_deref());

    let mut process = Process::init(config).await.map_err(|err| {
        error!(error = %err, "could not initialize backup process");
        EXIT_INIT
    })?;

    let executed = process.execute().await;

    // the report is written even when closing the volumes failed
    let mut outcome = Ok(());
    if let Err(err) = &executed {
        error!(error = %err, "backup process finished with errors");
        outcome = Err(EXIT_CLOSE);
    }

    if let Some(run) = process.run_time() {
        let reports = collect_reports(run, process.entities());
        match write_reports(&report_dir, run, &reports) {
            Ok(path) => info!(path = %path.display(), "backup process finished"),
            Err(err) => {
                error!(dir = %report_dir.display(), error = %err, "could not write report");
                outcome = outcome.and(Err(EXIT_REPORT));
            }
        }
    }

    outcome
}

fn report_dir(flag: Option<&Path>, assets: Option<&Path>) -> PathBuf {
    flag.or(assets).unwrap_or(Path::new(".")).to_path_buf()
}
