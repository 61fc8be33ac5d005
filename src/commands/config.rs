use anyhow::Result;
use tracing::info;

use super::load_settings;
use crate::cli::{ConfigCommands, GlobalArgs};
use crate::config::{BinscriptConfig, BuildConfig, CacheConfig, ScaffoldConfig};

pub fn run(global: &GlobalArgs, command: &ConfigCommands) -> Result<i32> {
    match command {
        ConfigCommands::Validate { path } => validate(path),
        ConfigCommands::Generate => generate(),
        ConfigCommands::Show => show(global),
    }?;
    Ok(0)
}

fn validate(path: &str) -> Result<()> {
    info!("Validating config file: {}", path);

    let config = BinscriptConfig::from_file(path)?;
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path);
    println!("\nSummary:");
    println!(
        "  - Cache directory: {}",
        config.cache.dir.as_deref().unwrap_or("(platform default)")
    );
    println!("  - Lock timeout: {}", config.cache.lock_timeout);
    println!("  - Build shell: {}", config.build.shell);
    println!("  - Build output: {:?}", config.build.output);
    println!("  - Metadata block: {}", config.scaffold.metadata.as_str());

    Ok(())
}

fn generate() -> Result<()> {
    println!("{}", BinscriptConfig::example());
    Ok(())
}

fn show(global: &GlobalArgs) -> Result<()> {
    info!("Showing effective configuration");

    let settings = load_settings(global)?;
    let effective = BinscriptConfig {
        cache: CacheConfig {
            dir: Some(settings.cache_dir.display().to_string()),
            lock_timeout: if settings.lock_timeout.subsec_millis() == 0 {
                format!("{}s", settings.lock_timeout.as_secs())
            } else {
                format!("{}ms", settings.lock_timeout.as_millis())
            },
        },
        build: BuildConfig {
            shell: settings.shell.clone(),
            output: settings.output,
        },
        scaffold: ScaffoldConfig {
            metadata: settings.metadata_policy,
        },
    };

    match &settings.source {
        Some(path) => println!("# Config file: {}", path.display()),
        None => println!("# No config file found, using defaults"),
    }
    println!("{}", toml::to_string_pretty(&effective)?);

    Ok(())
}
