/// Build executor
///
/// Runs a script's build commands through the shell inside its scaffold directory.
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use super::process::{ExitOutcome, ProcessRunner, ProcessSpec, StreamMode};

/// Shell used when none is configured
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Exit status a POSIX shell reports when the command cannot be found
const SHELL_COMMAND_NOT_FOUND: i32 = 127;

pub const ENV_SCAFFOLD_DIR: &str = "BINSCRIPT_SCAFFOLD_DIR";
pub const ENV_SOURCE: &str = "BINSCRIPT_SOURCE";
pub const ENV_SOURCE_DIR: &str = "BINSCRIPT_SOURCE_DIR";

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn build command `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// What happens to build stdout/stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Keep it for the error report, show nothing on success
    #[default]
    Capture,
    /// Stream it straight to the terminal
    Inherit,
}

impl OutputMode {
    fn stream_mode(self) -> StreamMode {
        match self {
            OutputMode::Capture => StreamMode::Capture,
            OutputMode::Inherit => StreamMode::Inherit,
        }
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture" => Ok(OutputMode::Capture),
            "inherit" => Ok(OutputMode::Inherit),
            _ => Err(format!("Invalid build output mode: {}. Use: capture, inherit", s)),
        }
    }
}

/// Outcome of one build command
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub outcome: ExitOutcome,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl BuildResult {
    pub fn success(&self) -> bool {
        self.outcome.success()
    }
}

/// Environment exported to build commands
#[derive(Debug, Clone)]
pub struct BuildEnv {
    pub scaffold_dir: PathBuf,
    /// Canonical path of the script being built
    pub source: PathBuf,
}

impl BuildEnv {
    fn vars(&self) -> Vec<(&'static str, PathBuf)> {
        let source_dir = self
            .source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        vec![
            (ENV_SCAFFOLD_DIR, self.scaffold_dir.clone()),
            (ENV_SOURCE, self.source.clone()),
            (ENV_SOURCE_DIR, source_dir),
        ]
    }
}

/// Build executor
pub struct BuildExecutor<R> {
    runner: R,
    shell: PathBuf,
    output: OutputMode,
}

impl<R: ProcessRunner> BuildExecutor<R> {
    pub fn new(runner: R, shell: &str, output: OutputMode) -> Self {
        // Fall back to the configured name so the spawn error names it
        let shell = which::which(shell).unwrap_or_else(|_| PathBuf::from(shell));
        Self {
            runner,
            shell,
            output,
        }
    }

    /// Run `command` via `<shell> -c` with the scaffold as working directory.
    ///
    /// A non-zero exit is reported in the [`BuildResult`], not as an error.
    pub async fn run(
        &self,
        scaffold_dir: &Path,
        command: &str,
        env: &BuildEnv,
    ) -> Result<BuildResult, ExecError> {
        let mut spec = ProcessSpec::new(self.shell.as_os_str())
            .arg("-c")
            .arg(command)
            .cwd(scaffold_dir)
            .streams(self.output.stream_mode());
        for (key, value) in env.vars() {
            spec = spec.env(key, value);
        }

        info!(scaffold = %scaffold_dir.display(), command, "running build command");
        let start = Instant::now();

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|source| ExecError::SpawnFailed {
                command: command.to_string(),
                source,
            })?;

        let duration = start.elapsed();

        if output.outcome == ExitOutcome::Code(SHELL_COMMAND_NOT_FOUND) {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if detail.is_empty() {
                "command not found".to_string()
            } else {
                detail
            };
            return Err(ExecError::SpawnFailed {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, message),
            });
        }

        debug!(
            outcome = %output.outcome,
            duration_ms = duration.as_millis() as u64,
            "build command finished"
        );

        Ok(BuildResult {
            outcome: output.outcome,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        })
    }
}
