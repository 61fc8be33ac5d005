use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::script::BuildMode;

/// binscript - run compiled-language source files like scripts
///
/// Put `#!/usr/bin/env binscript` on the first line of a source file and a
/// `binscript-begin` / `binscript-end` block in its comments. The first run
/// builds it; later runs reuse the cached binary until the file changes.
#[derive(Parser, Debug)]
#[command(name = "binscript")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run compiled-language source files like scripts", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options accepted before the subcommand (or the script path)
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "BINSCRIPT_CONFIG")]
    pub config: Option<String>,

    /// Build cache root
    #[arg(long, env = "BINSCRIPT_CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// How long to wait for a concurrent build of the same script (e.g. "30s", "10m")
    #[arg(long, env = "BINSCRIPT_LOCK_TIMEOUT")]
    pub lock_timeout: Option<String>,

    /// Stream build output instead of showing it only on failure
    #[arg(
        long,
        env = "BINSCRIPT_SHOW_BUILD_OUTPUT",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub show_build_output: bool,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (if needed) and run a script
    Run(RunArgs),

    /// Build a script without running it
    Build(BuildArgs),

    /// Inspect and clean the build cache
    Cache(CacheArgs),

    /// Configuration management utilities
    Config(ConfigArgs),

    /// `binscript <script> [args...]`, the shebang form of `run`
    #[command(external_subcommand)]
    Script(Vec<OsString>),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Script file
    pub script: PathBuf,

    /// Arguments passed to the script (optionally after --)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

impl RunArgs {
    /// Split the external-subcommand form into script and arguments
    pub fn from_external(mut argv: Vec<OsString>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        let script = PathBuf::from(argv.remove(0));
        Some(Self { script, args: argv })
    }
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Script file
    pub script: PathBuf,

    /// default: build only if needed; source: rewrite sources and rebuild;
    /// full: wipe the cache entry and rebuild from scratch
    #[arg(short, long, value_enum, default_value_t = BuildMode::Default)]
    pub build_mode: BuildMode,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache information for a script
    Info {
        /// Script file path
        script: PathBuf,
    },

    /// Print a single item from `info` (e.g. cache_path, binary_path)
    Get {
        /// Item name
        name: String,

        /// Script file path
        script: PathBuf,
    },

    /// Remove cached builds of a script
    #[command(visible_alias = "clear")]
    Clean {
        /// Script file path (omit with --all)
        script: Option<PathBuf>,

        /// Remove every cache entry
        #[arg(long, conflicts_with = "script")]
        all: bool,
    },

    /// List cache entries
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Remove entries whose script changed, vanished, or failed to build
    Gc {
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Show cache statistics
    Stats,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Validate {
        /// Path to config file
        path: String,
    },
    /// Print an example config file
    Generate,
    /// Show effective configuration (merged from all sources)
    Show,
}
