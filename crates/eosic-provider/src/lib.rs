//! Container engine access for eosic
//!
//! This crate provides the narrow engine surface needed to stand up one
//! contract-build environment: image listing and building, the container
//! lifecycle, and exec with streamed output. It also owns the demultiplexer
//! that turns the engine's build-log and attach byte streams into output.

pub mod demux;
mod docker;
mod error;
mod types;

pub use demux::{ConsoleSink, LogSink, StreamOrigin};
pub use docker::DockerProvider;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Raw bytes as read from an engine response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Trait for container engine clients
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Check if the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// List local images in engine order
    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// Build an image. The returned stream carries newline-delimited
    /// build-log JSON and must be drained for the build to complete.
    async fn build(&self, config: &BuildConfig) -> Result<ByteStream>;

    /// Create a container from an image
    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId>;

    /// Start a container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Stop a container
    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()>;

    /// Remove a container
    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Get current information about a container
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Start a command in a running container. Output arrives as attach
    /// frames on the returned session.
    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecSession>;

    /// Exit code of a finished exec, if the engine knows it
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;
}

/// A started exec and its framed output
pub struct ExecSession {
    pub id: String,
    pub output: ByteStream,
}

/// Connect to the engine described by the global config
pub async fn create_provider(
    config: &eosic_config::EngineConfig,
) -> Result<Box<dyn ContainerProvider>> {
    let connected = match DockerProvider::new(&config.socket, config.timeout_secs) {
        Ok(provider) => provider.ping().await.map(|()| provider),
        Err(e) => Err(e),
    };
    match connected {
        Ok(provider) => {
            tracing::debug!("Connected to container engine at {:?}", config.socket);
            Ok(Box::new(provider))
        }
        Err(e) => {
            let socket_exists = std::path::Path::new(config.socket.trim_start_matches("unix://"))
                .exists();
            Err(ProviderError::ConnectionError(format_connection_error(
                &config.socket,
                socket_exists,
                &e,
            )))
        }
    }
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(socket_path: &str, socket_exists: bool, underlying: &ProviderError) -> String {
    let mut msg = String::from("Cannot connect to Docker\n\n");

    if !socket_exists {
        msg.push_str(&format!(
            "The Docker API socket was not found at:\n  {}\n\n",
            socket_path
        ));
        msg.push_str("To start Docker, run:\n");
        msg.push_str("  sudo systemctl enable --now docker\n");
    } else {
        msg.push_str(&format!(
            "The socket exists at {} but the daemon is not responding.\n\n",
            socket_path
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}
