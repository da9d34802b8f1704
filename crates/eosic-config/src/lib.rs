//! Configuration for eosic
//!
//! This crate handles:
//! - Global configuration (`~/.config/eosic/config.toml`)
//! - The per-project `eosic.json` store and its contract entries

mod error;
mod global;
mod project;

pub use error::*;
pub use global::*;
pub use project::*;
