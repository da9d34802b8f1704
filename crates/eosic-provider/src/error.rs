//! Error types for container providers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to connect to container engine: {0}")]
    ConnectionError(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Build failed: {0}")]
    BuildError(String),

    #[error("Exec failed: {0}")]
    ExecError(String),

    #[error("Container engine error: {0}")]
    RuntimeError(String),

    #[error("Output stream error: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<bollard::errors::Error> for ProviderError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;

        match err {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => ProviderError::ContainerNotFound(message),
            Error::DockerResponseServerError { message, .. } => {
                ProviderError::RuntimeError(message)
            }
            Error::IOError { err } => ProviderError::IoError(err),
            other => ProviderError::RuntimeError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
