//! Error types for eosic-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] eosic_config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] eosic_provider::ProviderError),

    /// An image or container the operation needs has not been resolved/created
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Process was cancelled")]
    Cancelled,

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Exec failed: {0}")]
    ExecFailed(String),

    #[error("No image matching {0} is available")]
    ImageNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
