//! Commands that run the node environment

use super::{teardown, teardown_after_failure};
use anyhow::{bail, Context, Result};
use eosic_config::Project;
use eosic_core::{DockerEos, NODE_PORTS};
use std::future::Future;
use std::path::Path;

/// Start the environment and keep it running until `shutdown` resolves,
/// then stop and remove it
pub async fn start(env: &mut DockerEos, shutdown: impl Future<Output = ()>) -> Result<()> {
    start_or_teardown(env).await?;

    let name = env
        .container()
        .map(|c| c.name.to_string())
        .unwrap_or_default();
    println!("Environment '{}' is running", name);
    println!("  HTTP API: http://localhost:{}", NODE_PORTS[0]);
    println!("  P2P:      localhost:{}", NODE_PORTS[1]);
    println!("\nPress Ctrl-C to stop.");

    shutdown.await;
    println!();
    teardown(env).await
}

/// Look up `contract` in the project at `root` and return the name it
/// compiles under. Runs before any container exists.
pub fn contract_name(root: &Path, contract: &str) -> Result<String> {
    let project = Project::load(root)
        .with_context(|| format!("No eosic project at {}", root.display()))?;
    let contract = project.contract(contract)?;
    Ok(contract.config.name)
}

/// Compile a contract already checked with [`contract_name`]
pub async fn compile(
    env: &mut DockerEos,
    contract: &str,
    keep: bool,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    start_or_teardown(env).await?;
    println!("Compiling '{}'...", contract);

    let outcome = tokio::select! {
        result = env.compile(contract) => Some(result),
        _ = shutdown => None,
    };
    finish(env, outcome, keep).await
}

/// Run an arbitrary command inside the environment
pub async fn exec(
    env: &mut DockerEos,
    cmd: Vec<String>,
    keep: bool,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    if cmd.is_empty() {
        teardown_after_failure(env).await;
        bail!("No command specified");
    }

    start_or_teardown(env).await?;

    let outcome = tokio::select! {
        result = env.exec(cmd) => Some(result),
        _ = shutdown => None,
    };
    finish(env, outcome, keep).await
}

/// Start the environment. A container that fails to come up is removed
/// even with `--keep`, since it holds the node ports.
async fn start_or_teardown(env: &mut DockerEos) -> Result<()> {
    if let Err(e) = env.start().await {
        teardown_after_failure(env).await;
        return Err(e).context("Failed to start environment");
    }
    Ok(())
}

/// Print command output and tear down unless asked to keep the container.
/// `None` means the command was interrupted.
async fn finish(
    env: &mut DockerEos,
    outcome: Option<eosic_core::Result<String>>,
    keep: bool,
) -> Result<()> {
    if !keep || outcome.is_none() {
        teardown(env).await?;
    } else if let Some(container) = env.container() {
        println!("Container '{}' left running", container.name);
    }

    match outcome {
        Some(result) => {
            print!("{}", result?);
            Ok(())
        }
        None => bail!("Interrupted"),
    }
}
