/// `binscript cache` command implementation
///
/// Inspects and cleans build cache entries (info, get, clean, list, gc, stats).
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use super::{load_settings, pipeline};
use crate::cli::{CacheArgs, CacheCommands, GlobalArgs};
use crate::cli_utils::{binscript_prefix, format_size};
use crate::script::cache::dir_size;
use crate::script::{CacheManager, Pipeline, SystemRunner};

pub async fn cache(global: &GlobalArgs, args: &CacheArgs) -> Result<i32> {
    let settings = load_settings(global)?;
    let pipeline = pipeline(&settings);

    match &args.command {
        CacheCommands::Info { script } => info(&pipeline, script),
        CacheCommands::Get { name, script } => get(&pipeline, name, script),
        CacheCommands::Clean { script, all } => clean(&pipeline, script.as_deref(), *all),
        CacheCommands::List { verbose } => list(pipeline.cache(), *verbose),
        CacheCommands::Gc { dry_run } => gc(pipeline.cache(), *dry_run),
        CacheCommands::Stats => stats(pipeline.cache()),
    }?;

    Ok(0)
}

fn print_item(name: &str, value: &str) {
    println!("{:20} {}", format!("{}:", name), value);
}

/// Everything `info` shows, keyed by the names `get` accepts
fn collect_info(pipeline: &Pipeline<SystemRunner>, script: &Path) -> Result<BTreeMap<&'static str, String>> {
    let prepared = pipeline
        .prepare(script)
        .with_context(|| format!("Failed to inspect script: {}", script.display()))?;
    let cache = pipeline.cache();
    let entry_dir = cache.entry_dir(&prepared.fingerprint);

    let mut items = BTreeMap::new();
    items.insert("script_path", prepared.path.display().to_string());
    items.insert("fingerprint", prepared.fingerprint.to_string());
    items.insert("cache_path", entry_dir.display().to_string());

    match cache.lookup(&prepared.fingerprint) {
        Some(entry) => {
            items.insert("status", entry.status.to_string());
            items.insert("binary_path", entry.binary_path.display().to_string());
            items.insert(
                "last_build_at",
                entry.last_build_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            );
            if let Some(duration) = entry.build_duration {
                items.insert("build_duration", format!("{:.2}s", duration.as_secs_f64()));
            }
            items.insert("dir_size", format_size(dir_size(&entry_dir)));
        }
        None => {
            items.insert("status", "not built".to_string());
            items.insert(
                "binary_path",
                entry_dir.join(&prepared.metadata.target_bin).display().to_string(),
            );
        }
    }

    Ok(items)
}

fn info(pipeline: &Pipeline<SystemRunner>, script: &Path) -> Result<()> {
    for (name, value) in collect_info(pipeline, script)? {
        print_item(name, &value);
    }
    Ok(())
}

fn get(pipeline: &Pipeline<SystemRunner>, name: &str, script: &Path) -> Result<()> {
    let items = collect_info(pipeline, script)?;

    match items.get(name) {
        Some(value) => {
            println!("{}", value);
            Ok(())
        }
        None => anyhow::bail!(
            "'{}' is not found. Available items: {}",
            name,
            items.keys().copied().collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Clean cache for a script or all scripts
fn clean(pipeline: &Pipeline<SystemRunner>, script: Option<&Path>, all: bool) -> Result<()> {
    let cache = pipeline.cache();

    if all {
        let report = cache.clean_all().context("Failed to clean cache")?;
        eprintln!(
            "{} Removed {} cache entries, {} skipped while building.",
            binscript_prefix(),
            report.removed,
            report.locked
        );
        return Ok(());
    }

    let Some(script) = script else {
        anyhow::bail!("Specify --all to clean all caches, or provide a script path");
    };

    // The script may be gone already; its old entries still name it
    let script_path = match script.canonicalize() {
        Ok(path) => path,
        Err(_) => {
            let cwd = std::env::current_dir().context("Failed to resolve script path")?;
            let joined = normalize_path(&cwd.join(script));
            match (joined.parent().and_then(|p| p.canonicalize().ok()), joined.file_name()) {
                (Some(parent), Some(name)) => parent.join(name),
                _ => joined,
            }
        }
    };
    let current = pipeline.prepare(script).ok().map(|prepared| prepared.fingerprint);

    let report = cache
        .remove_for_script(&script_path, current.as_ref())
        .context("Failed to clean cache")?;

    eprintln!(
        "{} Removed {} cache entries for {}, {} skipped while building.",
        binscript_prefix(),
        report.removed,
        script_path.display(),
        report.locked
    );
    Ok(())
}

/// Lexically resolve `.` and `..` in a path that may no longer exist
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn list(cache: &CacheManager, verbose: bool) -> Result<()> {
    let entries = cache.list().context("Failed to list cache entries")?;

    if entries.is_empty() {
        println!("No cache entries in {}", cache.root().display());
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {:8}  {}  {}",
            entry.fingerprint.short(),
            entry.status,
            entry.last_build_at.format("%Y-%m-%d %H:%M:%S"),
            entry.script_path.display()
        );

        if verbose {
            println!("    binary: {}", entry.binary_path.display());
            if let Some(duration) = entry.build_duration {
                println!("    build:  {:.2}s", duration.as_secs_f64());
            }
            println!("    size:   {}", format_size(dir_size(&entry.scaffold_dir)));
        }
    }

    println!();
    println!("{} entries", entries.len());
    Ok(())
}

fn gc(cache: &CacheManager, dry_run: bool) -> Result<()> {
    let report = cache.gc(dry_run).context("Failed to collect garbage")?;

    for candidate in &report.removed {
        let script = candidate
            .script_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {}  {:14}  {}",
            if dry_run { "would remove" } else { "removed" },
            candidate.fingerprint.short(),
            candidate.reason.as_str(),
            script
        );
    }

    eprintln!(
        "{} {} {} entries ({}), {} skipped while building.",
        binscript_prefix(),
        if dry_run { "Would remove" } else { "Removed" },
        report.removed.len(),
        format_size(report.freed_bytes()),
        report.locked
    );
    Ok(())
}

fn stats(cache: &CacheManager) -> Result<()> {
    let stats = cache.stats().context("Failed to compute cache statistics")?;

    println!("Cache root: {}", display_root(cache.root()));
    println!("Entries:    {}", stats.total_entries);
    println!("  ready:    {}", stats.ready);
    println!("  failed:   {}", stats.failed);
    println!("  building: {}", stats.building);
    if stats.unknown > 0 {
        println!("  unknown:  {}", stats.unknown);
    }
    println!("Total size: {}", format_size(stats.total_size_bytes));
    Ok(())
}

fn display_root(root: &Path) -> String {
    root.canonicalize()
        .unwrap_or_else(|_| PathBuf::from(root))
        .display()
        .to_string()
}
