//! Commands that do not need a running container

use anyhow::Result;
use eosic_config::GlobalConfig;
use eosic_core::{EnvironmentOptions, ImageResolver, Prompter};
use eosic_provider::{ContainerProvider, LogSink};

/// Resolve (or build) the environment image and print it
pub async fn image(
    provider: &dyn ContainerProvider,
    prompter: &dyn Prompter,
    options: &EnvironmentOptions,
    sink: &mut dyn LogSink,
) -> Result<()> {
    let resolver = ImageResolver::new(provider, prompter, &options.cwd)
        .with_default_dockerfile(options.default_dockerfile.clone())
        .with_max_build_attempts(options.max_build_attempts);

    let image = resolver.resolve(&options.image, sink).await?;

    println!("{}", image.id);
    for tag in &image.repo_tags {
        println!("  {}", tag);
    }
    Ok(())
}

/// Show the effective configuration, or only where it lives
pub fn config(config: &GlobalConfig, path_only: bool) -> Result<()> {
    let config_path = GlobalConfig::config_path()?;

    if path_only {
        println!("{}", config_path.display());
        return Ok(());
    }

    if config_path.exists() {
        println!("# Config file: {:?}\n", config_path);
    } else {
        println!("# Config file: {:?} (not created yet)\n", config_path);
    }
    println!("{}", config.to_toml()?);
    Ok(())
}
