//! XDG Base Directory support for binscript
//!
//! Directory structure:
//! - `$XDG_CACHE_HOME/binscript/` (default: `~/.cache/binscript/`) - Build cache
//! - `$XDG_CONFIG_HOME/binscript/` (default: `~/.config/binscript/`) - Global configuration

use std::path::PathBuf;

const APP_DIR: &str = "binscript";

/// Default build cache root
///
/// Respects XDG_CACHE_HOME, then the platform cache directory
/// (`~/Library/Caches` on macOS).
pub fn cache_dir() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg_cache).join(APP_DIR)
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".cache").join(APP_DIR)
    } else {
        PathBuf::from(".binscript-cache")
    }
}

/// Directory holding the global `config.toml`
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        Some(PathBuf::from(xdg_config).join(APP_DIR))
    } else {
        dirs::config_dir().map(|dir| dir.join(APP_DIR))
    }
}
