use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::BinscriptConfig;
use crate::xdg;

/// Project-level config file name
pub const CONFIG_FILE_NAME: &str = "binscript.toml";

/// Discovers configuration by traversing up the directory tree from `start_dir`,
/// then falling back to the global `config.toml`
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    for dir in start_dir.ancestors() {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return Some(config_path);
        }
    }

    xdg::config_dir()
        .map(|dir| dir.join("config.toml"))
        .filter(|path| path.is_file())
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path.
/// Otherwise, auto-discovers config from the current directory.
///
/// Returns Ok(None) if no config is found (neither explicit nor discovered).
pub fn load_config_with_discovery(
    explicit_path: Option<&str>,
) -> Result<Option<(PathBuf, BinscriptConfig)>> {
    let path = match explicit_path {
        Some(path) => PathBuf::from(path),
        None => {
            let current_dir = std::env::current_dir()
                .context("Failed to get current directory for config discovery")?;
            match discover_config(&current_dir) {
                Some(path) => path,
                None => {
                    debug!("no configuration file found, using defaults");
                    return Ok(None);
                }
            }
        }
    };

    debug!(path = %path.display(), "loading configuration");
    let config = BinscriptConfig::from_file(&path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    Ok(Some((path, config)))
}
