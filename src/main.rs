use anyhow::Result;
use clap::Parser;

use binscript::cli::{Cli, Commands, RunArgs};
use binscript::{commands, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.global.verbose);

    let code = match &cli.command {
        Commands::Run(args) => commands::run::run(&cli.global, args).await?,
        Commands::Script(argv) => {
            let Some(args) = RunArgs::from_external(argv.clone()) else {
                anyhow::bail!("No script given");
            };
            commands::run::run(&cli.global, &args).await?
        }
        Commands::Build(args) => commands::build::run(&cli.global, args).await?,
        Commands::Cache(args) => commands::cache::cache(&cli.global, args).await?,
        Commands::Config(args) => commands::config::run(&cli.global, &args.command)?,
    };

    // The target's exit code becomes ours
    std::process::exit(code);
}
