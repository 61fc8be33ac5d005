/// Script pipeline
///
/// read -> parse -> fingerprint -> ensure ready -> launch
use chrono::Utc;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::cache::{BuildMode, BuildRequest, CacheEntry, CacheError, CacheManager};
use super::executor::{BuildExecutor, OutputMode, DEFAULT_SHELL};
use super::fingerprint::Fingerprint;
use super::launcher::{LaunchError, Launcher};
use super::metadata::{parse_metadata, ParseError, ScriptMetadata};
use super::process::{ExitOutcome, ProcessRunner};
use super::scaffold::{MetadataPolicy, ScaffoldWriter};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Build(#[from] CacheError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl PipelineError {
    /// Name of the phase that failed
    pub fn phase(&self) -> &'static str {
        match self {
            PipelineError::Read { .. } => "read",
            PipelineError::Parse { .. } => "parse",
            PipelineError::Build(_) => "build",
            PipelineError::Launch(_) => "launch",
        }
    }
}

/// Resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub cache_root: PathBuf,
    pub lock_timeout: Duration,
    pub shell: String,
    pub output: OutputMode,
    pub metadata_policy: MetadataPolicy,
}

impl PipelineOptions {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            lock_timeout: Duration::from_secs(600),
            shell: DEFAULT_SHELL.to_string(),
            output: OutputMode::Capture,
            metadata_policy: MetadataPolicy::Retain,
        }
    }
}

/// A script that has been read, parsed, and fingerprinted
#[derive(Debug, Clone)]
pub struct PreparedScript {
    /// Canonical path
    pub path: PathBuf,
    pub body: Vec<u8>,
    pub metadata: ScriptMetadata,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// An existing ready entry was reused
    Hit,
    /// This invocation ran the build
    Built,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub entry: CacheEntry,
    pub outcome: BuildOutcome,
}

pub struct Pipeline<R> {
    cache: CacheManager,
    scaffold: ScaffoldWriter,
    executor: BuildExecutor<R>,
    launcher: Launcher<R>,
}

impl<R: ProcessRunner + Clone> Pipeline<R> {
    pub fn new(options: &PipelineOptions, runner: R) -> Self {
        Self {
            cache: CacheManager::new(&options.cache_root, options.lock_timeout),
            scaffold: ScaffoldWriter::new(options.metadata_policy),
            executor: BuildExecutor::new(runner.clone(), &options.shell, options.output),
            launcher: Launcher::new(runner),
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Read, parse, and fingerprint the script at `path`
    pub fn prepare(&self, path: &Path) -> Result<PreparedScript, PipelineError> {
        let read_error = |source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        };

        let canonical = path.canonicalize().map_err(read_error)?;
        let body = std::fs::read(&canonical).map_err(read_error)?;

        let metadata = parse_metadata(&body).map_err(|source| PipelineError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let fingerprint = Fingerprint::compute(&body, self.scaffold.policy());

        debug!(
            path = %canonical.display(),
            fingerprint = %fingerprint.short(),
            "script prepared"
        );

        Ok(PreparedScript {
            path: canonical,
            body,
            metadata,
            fingerprint,
        })
    }

    /// Make sure the script's binary is built
    pub async fn build(
        &self,
        script: &PreparedScript,
        mode: BuildMode,
    ) -> Result<BuildReport, PipelineError> {
        let started = Utc::now();
        let request = BuildRequest {
            fingerprint: &script.fingerprint,
            metadata: &script.metadata,
            script_body: &script.body,
            script_path: &script.path,
            mode,
        };

        let entry = self
            .cache
            .ensure_ready(&request, &self.scaffold, &self.executor)
            .await?;

        // A build finished before we started means someone else did the work
        let outcome = if entry.last_build_at < started {
            BuildOutcome::Hit
        } else {
            BuildOutcome::Built
        };

        Ok(BuildReport { entry, outcome })
    }

    /// Full pipeline; returns how the target exited
    pub async fn run(&self, path: &Path, args: &[OsString]) -> Result<ExitOutcome, PipelineError> {
        let script = self.prepare(path)?;
        let report = self.build(&script, BuildMode::Default).await?;

        let outcome = self
            .launcher
            .launch(
                &report.entry,
                script.metadata.target_interpreter.as_deref(),
                args,
            )
            .await?;

        Ok(outcome)
    }
}
