//! eosic - EOS smart-contract environment CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use eosic_cli::commands;
use eosic_cli::prompt::DialoguerPrompter;
use eosic_config::GlobalConfig;
use eosic_core::{DockerEos, EnvironmentOptions};
use eosic_provider::{create_provider, ConsoleSink, ContainerProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "eosic")]
#[command(author, version, about = "EOS smart-contract development environment", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Override the image repository
    #[arg(long, global = true)]
    repository: Option<String>,

    /// Override the image tag
    #[arg(long, global = true)]
    tag: Option<String>,

    /// Override the Docker socket
    #[arg(long, global = true)]
    socket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node environment and keep it running until Ctrl-C
    Start,

    /// Compile a contract from the project's contracts directory
    Compile {
        /// Contract name as listed in eosic.json
        contract: String,
        /// Leave the container running afterwards
        #[arg(long)]
        keep: bool,
    },

    /// Run a command inside the environment
    Exec {
        /// Leave the container running afterwards
        #[arg(long)]
        keep: bool,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },

    /// Resolve (or build) the environment image
    Image,

    /// Show global configuration
    Config {
        /// Only print the config file path
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = GlobalConfig::load().context("Failed to load configuration")?;
    if let Some(repository) = cli.repository {
        config.image.repository = repository;
    }
    if let Some(tag) = cli.tag {
        config.image.tag = tag;
    }
    if let Some(socket) = cli.socket {
        config.engine.socket = socket;
    }
    config.validate()?;

    // Handle config command separately (doesn't need the engine)
    if let Commands::Config { path } = cli.command {
        return commands::config(&config, path);
    }

    let cwd = project_dir(cli.cwd)?;
    let options = EnvironmentOptions::from_config(&config, &cwd);
    tracing::debug!("Project directory {}", cwd.display());

    // A bad project or contract name fails before the engine is touched
    let compile_target = match &cli.command {
        Commands::Compile { contract, .. } => Some(commands::contract_name(&cwd, contract)?),
        _ => None,
    };

    let provider: Arc<dyn ContainerProvider> = Arc::from(create_provider(&config.engine).await?);
    let prompter = Arc::new(DialoguerPrompter);

    match cli.command {
        Commands::Image => {
            commands::image(provider.as_ref(), prompter.as_ref(), &options, &mut ConsoleSink).await?;
        }
        Commands::Start => {
            let mut env = DockerEos::create(provider, prompter, options).await?;
            commands::start(&mut env, shutdown_signal()).await?;
        }
        Commands::Compile { contract, keep } => {
            let contract = compile_target.unwrap_or(contract);
            let mut env = DockerEos::create(provider, prompter, options).await?;
            commands::compile(&mut env, &contract, keep, shutdown_signal()).await?;
        }
        Commands::Exec { keep, cmd } => {
            let mut env = DockerEos::create(provider, prompter, options).await?;
            commands::exec(&mut env, cmd, keep, shutdown_signal()).await?;
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    }

    Ok(())
}

/// Absolute project directory from `--cwd` or the process working directory
fn project_dir(cwd: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let current = std::env::current_dir().context("Cannot read current directory")?;
    Ok(match cwd {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => current.join(dir),
        None => current,
    })
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
