// Library interface for binscript
// The binary and the integration tests both go through these modules

pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod logging;
pub mod merger;
pub mod script;
pub mod xdg;

// Re-export commonly used types
pub use config::BinscriptConfig;
pub use script::{parse_metadata, Fingerprint, Pipeline, PipelineError, PipelineOptions};
