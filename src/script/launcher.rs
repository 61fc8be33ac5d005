/// Target launcher
///
/// Runs a built binary with inherited stdio and reports how it exited.
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::logging::operations;

use super::cache::CacheEntry;
use super::process::{ExitOutcome, ProcessRunner, ProcessSpec, StreamMode};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("built binary not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("built binary is not executable: {}", .0.display())]
    NotExecutable(PathBuf),

    #[error("failed to start {}: {source}", .path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct Launcher<R> {
    runner: R,
}

impl<R: ProcessRunner> Launcher<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Run the entry's binary with `args`, optionally behind an interpreter
    /// command such as `java -jar`.
    pub async fn launch(
        &self,
        entry: &CacheEntry,
        interpreter: Option<&str>,
        args: &[OsString],
    ) -> Result<ExitOutcome, LaunchError> {
        let binary = &entry.binary_path;

        if !binary.is_file() {
            return Err(LaunchError::NotFound(binary.clone()));
        }

        let spec = match interpreter.map(str::split_whitespace) {
            Some(mut words) => {
                let Some(program) = words.next() else {
                    return Err(LaunchError::SpawnFailed {
                        path: binary.clone(),
                        source: io::Error::new(io::ErrorKind::InvalidInput, "empty interpreter"),
                    });
                };
                let program = which::which(program).unwrap_or_else(|_| PathBuf::from(program));
                ProcessSpec::new(program)
                    .args(words)
                    .arg(binary.as_os_str())
            }
            None => {
                if !is_executable(binary) {
                    return Err(LaunchError::NotExecutable(binary.clone()));
                }
                ProcessSpec::new(binary.as_os_str())
            }
        };
        let spec = spec.args(args.iter().cloned()).streams(StreamMode::Inherit);

        debug!(
            operation = operations::LAUNCH,
            binary = %binary.display(),
            fingerprint = %entry.fingerprint.short(),
            args = args.len(),
            "launching target"
        );

        let output = self.runner.run(&spec).await.map_err(|source| {
            if source.kind() == io::ErrorKind::PermissionDenied {
                LaunchError::NotExecutable(binary.clone())
            } else {
                LaunchError::SpawnFailed {
                    path: binary.clone(),
                    source,
                }
            }
        })?;

        debug!(outcome = %output.outcome, "target exited");
        Ok(output.outcome)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}
