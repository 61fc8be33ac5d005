use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::script::{MetadataPolicy, OutputMode};

/// Complete binscript configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BinscriptConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub scaffold: ScaffoldConfig,
}

/// Build cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache root; `~/` is expanded. Defaults to the platform cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// How long to wait for another process building the same script
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            lock_timeout: default_lock_timeout(),
        }
    }
}

/// Build command configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Shell that runs `build_cmd` as `<shell> -c <cmd>`
    #[serde(default = "default_shell")]
    pub shell: String,

    /// capture (show only on failure) or inherit (stream live)
    #[serde(default)]
    pub output: OutputMode,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            output: OutputMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScaffoldConfig {
    /// retain or strip the metadata block in the scaffold copy of the script
    #[serde(default)]
    pub metadata: MetadataPolicy,
}

fn default_lock_timeout() -> String {
    "10m".to_string()
}

fn default_shell() -> String {
    crate::script::executor::DEFAULT_SHELL.to_string()
}

impl BinscriptConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: BinscriptConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Example configuration as TOML string
    pub fn example() -> String {
        let config = BinscriptConfig {
            cache: CacheConfig {
                dir: Some("~/.cache/binscript".to_string()),
                lock_timeout: "10m".to_string(),
            },
            build: BuildConfig {
                shell: "/bin/sh".to_string(),
                output: OutputMode::Capture,
            },
            scaffold: ScaffoldConfig {
                metadata: MetadataPolicy::Retain,
            },
        };

        // Plain structs of strings and unit enums always serialize
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.cache.dir {
            if dir.trim().is_empty() {
                anyhow::bail!("cache.dir must not be empty when set");
            }
        }

        parse_duration(&self.cache.lock_timeout)
            .with_context(|| format!("cache.lock_timeout is invalid: {}", self.cache.lock_timeout))?;

        if self.build.shell.trim().is_empty() {
            anyhow::bail!("build.shell must be set");
        }

        Ok(())
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Parse duration string (e.g. "30s", "10m", "1h", "500ms")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }

    if let Some(millis) = s.strip_suffix("ms") {
        let num: u64 = millis
            .parse()
            .map_err(|_| anyhow!("Invalid duration: {}", s))?;
        return Ok(Duration::from_millis(num));
    }

    // A bare number means seconds
    let (num_str, unit) = match s.char_indices().last() {
        Some((idx, c)) if !c.is_ascii_digit() => (&s[..idx], &s[idx..]),
        _ => (s, "s"),
    };
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let multiplier: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(anyhow!("Invalid duration unit: {}. Use: ms, s, m, h", unit)),
    };
    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Invalid duration: {} is too large", s))?;

    Ok(Duration::from_secs(seconds))
}
