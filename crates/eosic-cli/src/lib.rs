//! eosic CLI library: command implementations and the terminal prompter

pub mod commands;
pub mod prompt;
