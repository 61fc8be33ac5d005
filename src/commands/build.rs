/// `binscript build` command implementation
use anyhow::Result;

use super::{load_settings, pipeline, report_failure, EXIT_FAILURE};
use crate::cli::{BuildArgs, GlobalArgs};
use crate::cli_utils::binscript_prefix;
use crate::script::BuildOutcome;

pub async fn run(global: &GlobalArgs, args: &BuildArgs) -> Result<i32> {
    let settings = load_settings(global)?;
    let pipeline = pipeline(&settings);

    let report = match pipeline.prepare(&args.script) {
        Ok(script) => pipeline.build(&script, args.build_mode).await,
        Err(e) => Err(e),
    };

    match report {
        Ok(report) => {
            let verb = match report.outcome {
                BuildOutcome::Hit => "Up to date",
                BuildOutcome::Built => "Built",
            };
            eprintln!(
                "{} {}: {}",
                binscript_prefix(),
                verb,
                report.entry.binary_path.display()
            );
            Ok(0)
        }
        Err(e) => {
            report_failure(&e);
            Ok(EXIT_FAILURE)
        }
    }
}
