/// `binscript run` command implementation
///
/// Builds the script if its cache entry is not ready, then runs the binary and
/// hands back its exit code.
use anyhow::Result;
use tracing::debug;

use super::{load_settings, pipeline, report_failure, EXIT_FAILURE};
use crate::cli::{GlobalArgs, RunArgs};

pub async fn run(global: &GlobalArgs, args: &RunArgs) -> Result<i32> {
    let settings = load_settings(global)?;
    debug!(
        script = %args.script.display(),
        cache = %settings.cache_dir.display(),
        "running script"
    );

    match pipeline(&settings).run(&args.script, &args.args).await {
        Ok(outcome) => Ok(outcome.exit_code()),
        Err(e) => {
            report_failure(&e);
            Ok(EXIT_FAILURE)
        }
    }
}
