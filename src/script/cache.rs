/// Build cache
///
/// Each fingerprint owns `<root>/<fingerprint>/`, holding the scaffold, the
/// produced binary, and a JSON status marker. Builds are serialized per
/// fingerprint through [`BuildLock`]; a `Ready` marker is the only thing that
/// counts as a hit.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::logging::{operations, status as log_status};

use super::executor::{BuildEnv, BuildExecutor, BuildResult, ExecError};
use super::fingerprint::Fingerprint;
use super::lock::{BuildLock, LockFailure, LOCK_DIR_NAME};
use super::metadata::ScriptMetadata;
use super::process::ProcessRunner;
use super::scaffold::{resolve_within, MetadataPolicy, ScaffoldError, ScaffoldWriter};

/// Status marker file inside every entry directory
pub const STATUS_FILE_NAME: &str = ".binscript-status.json";

const STATUS_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("build command exited with {}", .0.outcome)]
    BuildFailed(BuildResult),

    #[error("timed out after {}s waiting for the build lock of {fingerprint}", .waited.as_secs())]
    LockTimeout {
        fingerprint: Fingerprint,
        waited: Duration,
    },

    #[error(transparent)]
    Scaffold(#[from] ScaffoldError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("cache I/O failed at {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Building,
    Ready,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Building => "building",
            EntryStatus::Ready => "ready",
            EntryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// How much of an existing entry to redo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BuildMode {
    /// Build only when no ready entry exists
    #[default]
    Default,
    /// Rewrite the scaffold and rerun `build_cmd`
    Source,
    /// Wipe the entry and rerun `build_once_cmd` and `build_cmd`
    Full,
}

/// On-disk status marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMarker {
    pub version: u32,
    pub fingerprint: String,
    pub status: EntryStatus,
    pub script_path: PathBuf,
    pub target_bin: String,
    pub metadata_policy: MetadataPolicy,
    pub last_build_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_duration_ms: Option<u64>,
}

/// A cache entry as seen through its status marker
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub scaffold_dir: PathBuf,
    pub binary_path: PathBuf,
    pub status: EntryStatus,
    pub last_build_at: DateTime<Utc>,
    pub script_path: PathBuf,
    pub metadata_policy: MetadataPolicy,
    pub build_duration: Option<Duration>,
}

impl CacheEntry {
    fn from_marker(
        fingerprint: Fingerprint,
        scaffold_dir: PathBuf,
        marker: StatusMarker,
    ) -> io::Result<Self> {
        let binary_path = resolve_within(&scaffold_dir, &marker.target_bin)?;

        Ok(Self {
            fingerprint,
            scaffold_dir,
            binary_path,
            status: marker.status,
            last_build_at: marker.last_build_at,
            script_path: marker.script_path,
            metadata_policy: marker.metadata_policy,
            build_duration: marker.build_duration_ms.map(Duration::from_millis),
        })
    }

    /// A `Ready` marker is a hit even if the binary has since gone missing;
    /// launching then reports the missing binary instead of rebuilding.
    pub fn is_ready(&self) -> bool {
        self.status == EntryStatus::Ready
    }
}

/// Everything [`CacheManager::ensure_ready`] needs to know about one script
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub fingerprint: &'a Fingerprint,
    pub metadata: &'a ScriptMetadata,
    pub script_body: &'a [u8],
    /// Canonical script location, recorded in the marker
    pub script_path: &'a Path,
    pub mode: BuildMode,
}

/// Why `gc` picked an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReason {
    /// No readable status marker
    Orphaned,
    ScriptMissing,
    /// The script changed since this entry was built
    Stale,
    Failed,
    /// `Building` marker with nobody holding the lock
    Interrupted,
}

impl GcReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GcReason::Orphaned => "orphaned",
            GcReason::ScriptMissing => "script missing",
            GcReason::Stale => "stale",
            GcReason::Failed => "failed",
            GcReason::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcCandidate {
    pub fingerprint: Fingerprint,
    pub script_path: Option<PathBuf>,
    pub reason: GcReason,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub removed: Vec<GcCandidate>,
    /// Entries skipped because a build holds their lock
    pub locked: usize,
}

impl GcReport {
    pub fn freed_bytes(&self) -> u64 {
        self.removed.iter().map(|c| c.size_bytes).sum()
    }
}

/// Outcome of removing entries on request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: usize,
    /// Entries left alone because a build holds their lock
    pub locked: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub ready: usize,
    pub failed: usize,
    pub building: usize,
    /// Directories without a readable marker
    pub unknown: usize,
    pub total_size_bytes: u64,
}

/// Cache manager
#[derive(Debug, Clone)]
pub struct CacheManager {
    root: PathBuf,
    lock_timeout: Duration,
}

impl CacheManager {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.as_str())
    }

    /// Current entry for `fingerprint`, if a readable marker exists
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let dir = self.entry_dir(fingerprint);
        let marker = read_marker(&dir)?;
        match CacheEntry::from_marker(fingerprint.clone(), dir, marker) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(fingerprint = %fingerprint.short(), "ignoring status marker: {}", e);
                None
            }
        }
    }

    /// Return a ready entry, building it first when needed.
    ///
    /// The fast path takes no lock. Otherwise the fingerprint's build lock is
    /// held until this returns, and the marker is re-checked once it is taken.
    pub async fn ensure_ready<R: ProcessRunner>(
        &self,
        request: &BuildRequest<'_>,
        scaffold: &ScaffoldWriter,
        executor: &BuildExecutor<R>,
    ) -> Result<CacheEntry, CacheError> {
        let fingerprint = request.fingerprint;

        if request.mode == BuildMode::Default {
            if let Some(entry) = self.lookup(fingerprint).filter(CacheEntry::is_ready) {
                debug!(
                    operation = operations::LOOKUP,
                    status = log_status::HIT,
                    fingerprint = %fingerprint.short(),
                    "cache hit"
                );
                return Ok(entry);
            }
        }

        let _lock = BuildLock::acquire(&self.root, fingerprint, self.lock_timeout)
            .await
            .map_err(|failure| match failure {
                LockFailure::Timeout(waited) => CacheError::LockTimeout {
                    fingerprint: fingerprint.clone(),
                    waited,
                },
                LockFailure::Io(e) => {
                    CacheError::io(BuildLock::path_for(&self.root, fingerprint), e)
                }
            })?;

        if request.mode == BuildMode::Default {
            if let Some(entry) = self.lookup(fingerprint).filter(CacheEntry::is_ready) {
                debug!(
                    fingerprint = %fingerprint.short(),
                    "entry became ready while waiting for the lock"
                );
                return Ok(entry);
            }
        }

        self.build_locked(request, scaffold, executor).await
    }

    async fn build_locked<R: ProcessRunner>(
        &self,
        request: &BuildRequest<'_>,
        scaffold: &ScaffoldWriter,
        executor: &BuildExecutor<R>,
    ) -> Result<CacheEntry, CacheError> {
        let fingerprint = request.fingerprint;
        let dir = self.entry_dir(fingerprint);

        if request.mode == BuildMode::Full && dir.exists() {
            debug!(scaffold = %dir.display(), "full rebuild, wiping entry");
            fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }
        // Setup reruns until an attempt has gone all the way to Ready
        let fresh = read_marker(&dir).map_or(true, |m| m.status != EntryStatus::Ready);

        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        info!(
            operation = operations::BUILD,
            status = log_status::MISS,
            fingerprint = %fingerprint.short(),
            script = %request.script_path.display(),
            mode = ?request.mode,
            "building script"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let mut marker = StatusMarker {
            version: STATUS_VERSION,
            fingerprint: fingerprint.to_string(),
            status: EntryStatus::Building,
            script_path: request.script_path.to_path_buf(),
            target_bin: request.metadata.target_bin.clone(),
            metadata_policy: scaffold.policy(),
            last_build_at: started_at,
            build_duration_ms: None,
        };
        write_marker(&dir, &marker)?;

        let outcome = self.run_build(&dir, fresh, request, scaffold, executor).await;

        marker.build_duration_ms = Some(start.elapsed().as_millis() as u64);
        marker.status = match &outcome {
            Ok(()) => EntryStatus::Ready,
            Err(_) => EntryStatus::Failed,
        };
        write_marker(&dir, &marker)?;

        match outcome {
            Ok(()) => {
                info!(
                    operation = operations::BUILD,
                    status = log_status::READY,
                    fingerprint = %fingerprint.short(),
                    duration_ms = marker.build_duration_ms,
                    "build finished"
                );
                CacheEntry::from_marker(fingerprint.clone(), dir.clone(), marker)
                    .map_err(|e| CacheError::io(dir, e))
            }
            Err(e) => {
                warn!(
                    operation = operations::BUILD,
                    status = log_status::FAILED,
                    fingerprint = %fingerprint.short(),
                    "build failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_build<R: ProcessRunner>(
        &self,
        dir: &Path,
        fresh: bool,
        request: &BuildRequest<'_>,
        scaffold: &ScaffoldWriter,
        executor: &BuildExecutor<R>,
    ) -> Result<(), CacheError> {
        scaffold.write(dir, request.metadata, request.script_body)?;

        let env = BuildEnv {
            scaffold_dir: dir.to_path_buf(),
            source: request.script_path.to_path_buf(),
        };

        if fresh {
            if let Some(once) = &request.metadata.build_once_cmd {
                let result = executor.run(dir, once, &env).await?;
                if !result.success() {
                    return Err(CacheError::BuildFailed(result));
                }
            }
        }

        let result = executor.run(dir, &request.metadata.build_cmd, &env).await?;
        if !result.success() {
            return Err(CacheError::BuildFailed(result));
        }

        Ok(())
    }

    /// Every entry with a readable marker, newest build first
    pub fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries: Vec<CacheEntry> = self
            .entry_dirs()?
            .into_iter()
            .filter_map(|(fp, dir)| {
                let marker = read_marker(&dir)?;
                CacheEntry::from_marker(fp, dir, marker).ok()
            })
            .collect();

        entries.sort_by(|a, b| b.last_build_at.cmp(&a.last_build_at));
        Ok(entries)
    }

    /// Remove one entry unless a build holds its lock
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<CleanReport, CacheError> {
        let mut report = CleanReport::default();
        self.remove_unlocked(fingerprint, &mut report)?;
        Ok(report)
    }

    /// Remove every entry built from `script_path`, current and stale alike,
    /// plus the entry for `current` when given
    pub fn remove_for_script(
        &self,
        script_path: &Path,
        current: Option<&Fingerprint>,
    ) -> Result<CleanReport, CacheError> {
        let mut fingerprints: Vec<Fingerprint> = self
            .list()?
            .into_iter()
            .filter(|entry| entry.script_path == script_path)
            .map(|entry| entry.fingerprint)
            .collect();
        if let Some(current) = current {
            if !fingerprints.contains(current) {
                fingerprints.push(current.clone());
            }
        }

        let mut report = CleanReport::default();
        for fingerprint in &fingerprints {
            self.remove_unlocked(fingerprint, &mut report)?;
        }
        Ok(report)
    }

    /// Remove every entry not currently being built
    pub fn clean_all(&self) -> Result<CleanReport, CacheError> {
        let mut report = CleanReport::default();
        for (fingerprint, _) in self.entry_dirs()? {
            self.remove_unlocked(&fingerprint, &mut report)?;
        }
        Ok(report)
    }

    fn remove_unlocked(
        &self,
        fingerprint: &Fingerprint,
        report: &mut CleanReport,
    ) -> Result<(), CacheError> {
        let dir = self.entry_dir(fingerprint);
        if !dir.exists() {
            return Ok(());
        }

        let Some(_lock) = self.try_lock(fingerprint)? else {
            debug!(fingerprint = %fingerprint.short(), "skipping entry being built");
            report.locked += 1;
            return Ok(());
        };

        fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        debug!(fingerprint = %fingerprint.short(), "cache entry removed");
        report.removed += 1;
        Ok(())
    }

    /// Remove entries that can never be hit again.
    pub fn gc(&self, dry_run: bool) -> Result<GcReport, CacheError> {
        let mut report = GcReport::default();

        for (fingerprint, dir) in self.entry_dirs()? {
            let Some(_lock) = self.try_lock(&fingerprint)? else {
                report.locked += 1;
                continue;
            };

            let marker = read_marker(&dir);
            let Some(reason) = gc_reason(&fingerprint, marker.as_ref()) else {
                continue;
            };

            let candidate = GcCandidate {
                size_bytes: dir_size(&dir),
                script_path: marker.map(|m| m.script_path),
                fingerprint,
                reason,
            };

            if !dry_run {
                fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            }
            debug!(
                operation = operations::GC,
                fingerprint = %candidate.fingerprint.short(),
                reason = candidate.reason.as_str(),
                dry_run,
                "gc candidate"
            );
            report.removed.push(candidate);
        }

        Ok(report)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();

        for (_, dir) in self.entry_dirs()? {
            stats.total_entries += 1;
            stats.total_size_bytes += dir_size(&dir);
            match read_marker(&dir).map(|m| m.status) {
                Some(EntryStatus::Ready) => stats.ready += 1,
                Some(EntryStatus::Failed) => stats.failed += 1,
                Some(EntryStatus::Building) => stats.building += 1,
                None => stats.unknown += 1,
            }
        }

        Ok(stats)
    }

    fn try_lock(&self, fingerprint: &Fingerprint) -> Result<Option<BuildLock>, CacheError> {
        BuildLock::try_acquire(&self.root, fingerprint)
            .map_err(|e| CacheError::io(BuildLock::path_for(&self.root, fingerprint), e))
    }

    /// Directories under the root that are named by a fingerprint
    fn entry_dirs(&self) -> Result<Vec<(Fingerprint, PathBuf)>, CacheError> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut dirs = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CacheError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == LOCK_DIR_NAME {
                continue;
            }
            let Some(fingerprint) = Fingerprint::from_hex(name) else {
                continue;
            };
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push((fingerprint, entry.path()));
            }
        }

        dirs.sort();
        Ok(dirs)
    }
}

fn gc_reason(fingerprint: &Fingerprint, marker: Option<&StatusMarker>) -> Option<GcReason> {
    let Some(marker) = marker else {
        return Some(GcReason::Orphaned);
    };

    match marker.status {
        EntryStatus::Failed => return Some(GcReason::Failed),
        // The caller holds the lock, so no build is in flight
        EntryStatus::Building => return Some(GcReason::Interrupted),
        EntryStatus::Ready => {}
    }

    match fs::read(&marker.script_path) {
        Ok(body) if Fingerprint::compute(&body, marker.metadata_policy) == *fingerprint => None,
        Ok(_) => Some(GcReason::Stale),
        Err(_) => Some(GcReason::ScriptMissing),
    }
}

fn read_marker(dir: &Path) -> Option<StatusMarker> {
    let path = dir.join(STATUS_FILE_NAME);
    let json = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<StatusMarker>(&json) {
        Ok(marker) if marker.version == STATUS_VERSION => Some(marker),
        Ok(marker) => {
            debug!(path = %path.display(), version = marker.version, "ignoring marker with unknown version");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), "unreadable status marker: {}", e);
            None
        }
    }
}

/// Write the marker via a temp file and rename so readers never see a partial one
fn write_marker(dir: &Path, marker: &StatusMarker) -> Result<(), CacheError> {
    let path = dir.join(STATUS_FILE_NAME);
    let tmp = dir.join(format!("{}.tmp", STATUS_FILE_NAME));

    let json = serde_json::to_string_pretty(marker)
        .map_err(|e| CacheError::io(&path, io::Error::other(e)))?;
    fs::write(&tmp, json).map_err(|e| CacheError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| CacheError::io(&path, e))?;

    debug!(path = %path.display(), status = %marker.status, "status marker written");
    Ok(())
}

pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
