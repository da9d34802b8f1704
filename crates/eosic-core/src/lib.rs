//! Core logic for the eosic contract-build environment
//!
//! This crate provides:
//! - Image resolution (local lookup, interactive build from a Dockerfile)
//! - The fixed container layout of the node environment
//! - Supervision of the one container an environment owns
//! - `DockerEos`, the facade tying it together

mod container;
mod environment;
mod error;
mod image;
mod prompt;
mod supervisor;

pub use container::*;
pub use environment::*;
pub use error::*;
pub use image::*;
pub use prompt::*;
pub use supervisor::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
