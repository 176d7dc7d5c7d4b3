//! Running external programs

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} did not finish within {after:?}")]
    Timeout { program: String, after: Duration },
}

/// Captured output of a finished program
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs programs with the process environment map and an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    env: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(env: HashMap<String, String>, timeout: Option<Duration>) -> Self {
        Self { env, timeout }
    }

    /// Run `program` to completion, failing on a non-zero exit
    pub async fn run<I, S>(&self, program: &Path, args: I, extra_env: &[(&str, &str)]) -> Result<CommandOutput, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let name = program.display().to_string();
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&self.env)
            .envs(extra_env.iter().copied())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(program = %name, "starting command");
        let started = Instant::now();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| CommandError::Timeout {
                    program: name.clone(),
                    after: limit,
                })?,
            None => command.output().await,
        }
        .map_err(|source| CommandError::Spawn {
            program: name.clone(),
            source,
        })?;

        debug!(program = %name, elapsed = ?started.elapsed(), status = %output.status, "command finished");

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(CommandError::Failed {
                program: name,
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}

/// Split a hook command line on whitespace into program and arguments
pub fn split_command_line(line: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = line.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command_line() {
        assert_eq!(
            split_command_line("mount  /mnt/share -o ro"),
            Some(("mount", vec!["/mnt/share", "-o", "ro"]))
        );
        assert_eq!(split_command_line("   "), None);
    }

    #[tokio::test]
    async fn test_environment_is_passed_to_child() {
        let env = HashMap::from([("BACKILLI_TEST_VALUE".to_string(), "from-config".to_string())]);
        let runner = CommandRunner::new(env, None);

        let output = runner
            .run(Path::new("sh"), ["-c", "echo $BACKILLI_TEST_VALUE-$EXTRA"], &[("EXTRA", "x")])
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "from-config-x");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let runner = CommandRunner::default();
        let err = runner
            .run(Path::new("sh"), ["-c", "echo broken >&2; exit 3"], &[])
            .await
            .unwrap_err();

        match err {
            CommandError::Failed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = CommandRunner::default();
        let result = runner
            .run(Path::new("/nonexistent/backilli-tool"), Vec::<String>::new(), &[])
            .await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_deadline_kills_slow_command() {
        let runner = CommandRunner::new(HashMap::new(), Some(Duration::from_millis(100)));
        let result = runner.run(Path::new("sleep"), ["5"], &[]).await;
        assert!(matches!(result, Err(CommandError::Timeout { .. })));
    }
}
