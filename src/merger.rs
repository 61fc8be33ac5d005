/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (handled by clap `env`)
/// 3. Configuration file
/// 4. Built-in defaults (lowest priority)
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::GlobalArgs;
use crate::config::{expand_home, parse_duration, BinscriptConfig};
use crate::script::{MetadataPolicy, OutputMode, PipelineOptions};
use crate::xdg;

/// Effective settings for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    pub cache_dir: PathBuf,
    pub lock_timeout: Duration,
    pub shell: String,
    pub output: OutputMode,
    pub metadata_policy: MetadataPolicy,
    /// Config file the values came from, if any
    pub source: Option<PathBuf>,
}

impl MergedConfig {
    /// Merge configuration from CLI args and config file
    /// Precedence: CLI > env (already handled by clap) > config file > defaults
    pub fn merge(args: &GlobalArgs, file_config: Option<(PathBuf, BinscriptConfig)>) -> Result<Self> {
        let (source, file) = match file_config {
            Some((path, config)) => (Some(path), config),
            None => (None, BinscriptConfig::default()),
        };

        let cache_dir = args
            .cache_dir
            .as_deref()
            .or(file.cache.dir.as_deref())
            .map(expand_home)
            .unwrap_or_else(xdg::cache_dir);

        let lock_timeout = match &args.lock_timeout {
            Some(value) => parse_duration(value)
                .with_context(|| format!("Invalid --lock-timeout: {}", value))?,
            None => parse_duration(&file.cache.lock_timeout).with_context(|| {
                format!("Invalid cache.lock_timeout: {}", file.cache.lock_timeout)
            })?,
        };

        let output = if args.show_build_output {
            OutputMode::Inherit
        } else {
            file.build.output
        };

        Ok(Self {
            cache_dir,
            lock_timeout,
            shell: file.build.shell,
            output,
            metadata_policy: file.scaffold.metadata,
            source,
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            cache_root: self.cache_dir.clone(),
            lock_timeout: self.lock_timeout,
            shell: self.shell.clone(),
            output: self.output,
            metadata_policy: self.metadata_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config() -> (PathBuf, BinscriptConfig) {
        let config: BinscriptConfig = toml::from_str(
            r#"
            [cache]
            dir = "/srv/binscript"
            lock_timeout = "30s"

            [build]
            shell = "/bin/bash"
            output = "inherit"
            "#,
        )
        .unwrap();
        (PathBuf::from("/etc/binscript.toml"), config)
    }

    #[test]
    fn test_defaults_without_file() {
        let merged = MergedConfig::merge(&GlobalArgs::default(), None).unwrap();

        assert_eq!(merged.lock_timeout, Duration::from_secs(600));
        assert_eq!(merged.shell, "/bin/sh");
        assert_eq!(merged.output, OutputMode::Capture);
        assert!(merged.cache_dir.ends_with("binscript"));
        assert_eq!(merged.source, None);
    }

    #[test]
    fn test_file_values_apply() {
        let merged = MergedConfig::merge(&GlobalArgs::default(), Some(file_config())).unwrap();

        assert_eq!(merged.cache_dir, PathBuf::from("/srv/binscript"));
        assert_eq!(merged.lock_timeout, Duration::from_secs(30));
        assert_eq!(merged.shell, "/bin/bash");
        assert_eq!(merged.output, OutputMode::Inherit);
        assert_eq!(merged.source, Some(PathBuf::from("/etc/binscript.toml")));
    }

    #[test]
    fn test_cli_overrides_file() {
        let args = GlobalArgs {
            cache_dir: Some("/tmp/override".to_string()),
            lock_timeout: Some("2m".to_string()),
            ..Default::default()
        };

        let merged = MergedConfig::merge(&args, Some(file_config())).unwrap();

        assert_eq!(merged.cache_dir, PathBuf::from("/tmp/override"));
        assert_eq!(merged.lock_timeout, Duration::from_secs(120));
        assert_eq!(merged.pipeline_options().cache_root, PathBuf::from("/tmp/override"));
    }

    #[test]
    fn test_invalid_cli_timeout() {
        let args = GlobalArgs {
            lock_timeout: Some("never".to_string()),
            ..Default::default()
        };
        assert!(MergedConfig::merge(&args, None).is_err());
    }
}
