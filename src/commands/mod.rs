pub mod build;
pub mod cache;
pub mod config;
pub mod run;

use anyhow::Result;
use std::io::Write;

use crate::cli::GlobalArgs;
use crate::cli_utils::binscript_prefix;
use crate::config_discovery::load_config_with_discovery;
use crate::merger::MergedConfig;
use crate::script::{CacheError, Pipeline, PipelineError, SystemRunner};

/// Exit code when binscript itself fails before or instead of the target running
pub const EXIT_FAILURE: i32 = 1;

/// Resolve settings from CLI, environment, and config file
pub fn load_settings(global: &GlobalArgs) -> Result<MergedConfig> {
    let file = load_config_with_discovery(global.config.as_deref())?;
    MergedConfig::merge(global, file)
}

pub fn pipeline(settings: &MergedConfig) -> Pipeline<SystemRunner> {
    Pipeline::new(&settings.pipeline_options(), SystemRunner)
}

/// Print a pipeline failure, with captured build output when there is any
pub fn report_failure(err: &PipelineError) {
    eprintln!("{} {} failed: {}", binscript_prefix(), err.phase(), err);

    let PipelineError::Build(CacheError::BuildFailed(result)) = err else {
        return;
    };

    let mut stderr = std::io::stderr().lock();
    for (name, captured) in [("stdout", &result.stdout), ("stderr", &result.stderr)] {
        if captured.is_empty() {
            continue;
        }
        let _ = writeln!(stderr, "{} build {}:", binscript_prefix(), name);
        let _ = stderr.write_all(captured);
        if !captured.ends_with(b"\n") {
            let _ = writeln!(stderr);
        }
    }
}
