//! CLI command implementations

mod lifecycle;
mod manage;

pub use lifecycle::*;
pub use manage::*;

use anyhow::{Context, Result};
use eosic_core::{DockerEos, EnvironmentState};
use tracing::warn;

/// Stop and remove the environment container
async fn teardown(env: &mut DockerEos) -> Result<()> {
    let name = container_name(env);

    println!("Stopping '{}'...", name);
    env.stop().await.context("Failed to stop environment")?;
    env.remove().await.context("Failed to remove environment")?;
    println!("Removed '{}'", name);
    Ok(())
}

/// Stop and remove after an earlier error. Secondary failures are only
/// logged so the original error is what gets reported.
async fn teardown_after_failure(env: &mut DockerEos) {
    if matches!(
        env.state(),
        EnvironmentState::Uninitialized | EnvironmentState::ImageResolved | EnvironmentState::Removed
    ) {
        return;
    }

    let name = container_name(env);
    if let Err(e) = env.stop().await {
        warn!("Failed to stop environment: {}", e);
    }
    match env.remove().await {
        Ok(()) => println!("Removed '{}'", name),
        Err(e) => warn!("Failed to remove environment: {}", e),
    }
}

fn container_name(env: &DockerEos) -> String {
    env.container()
        .map(|c| c.name.to_string())
        .unwrap_or_default()
}
