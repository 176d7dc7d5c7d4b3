//! Scan backup reports and print the failed entities of each run

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use backilli::audit::{AuditResult, audit_report, report_paths};
use backilli::backup::naming::DATE_FORMAT;

const EXIT_MISSING_DIR: u8 = 1;
const EXIT_DIR_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "backilli-auditor", version, about)]
struct Cli {
    /// Directory holding report_<dd-mm-yyyy>.json files
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Delete each report after it has been checked
    #[arg(long)]
    rm: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_MISSING_DIR),
            };
        }
    };

    let Some(dir) = cli.dir else {
        eprintln!("report directory is not set");
        let _ = Cli::command().print_help();
        return ExitCode::from(EXIT_MISSING_DIR);
    };

    let paths = match report_paths(&dir) {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_DIR_ERROR);
        }
    };

    let mut clean = true;
    for path in paths {
        match audit_report(&path) {
            Ok(result) => {
                if result.has_errors() {
                    clean = false;
                    print!("{}", render(&result));
                }
            }
            // unreadable reports are reported and kept on disk
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        }

        if cli.rm {
            if let Err(err) = std::fs::remove_file(&path) {
                eprintln!("could not remove {}: {err}", path.display());
            }
        }
    }

    if clean {
        println!("reports do not have errors");
    }
    ExitCode::SUCCESS
}

fn render(result: &AuditResult) -> String {
    let mut out = format!("report {} has errors:\n", result.date.format(DATE_FORMAT));
    for detail in &result.errors {
        out.push('\t');
        out.push_str(detail);
        out.push('\n');
    }
    out
}
