//! Terminal prompts for image resolution

use dialoguer::{theme::ColorfulTheme, Input, Select};
use eosic_core::{CoreError, Prompter};
use std::io::IsTerminal;

/// Asks questions on the terminal with dialoguer
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerPrompter;

impl DialoguerPrompter {
    fn require_terminal(prompt: &str) -> eosic_core::Result<()> {
        if std::io::stdin().is_terminal() {
            Ok(())
        } else {
            Err(CoreError::Prompt(format!(
                "'{}' needs an interactive terminal; build or tag the image first",
                prompt
            )))
        }
    }
}

impl Prompter for DialoguerPrompter {
    fn select(&self, prompt: &str, items: &[&str], default: usize) -> eosic_core::Result<usize> {
        Self::require_terminal(prompt)?;
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()
            .map_err(|e| CoreError::Prompt(e.to_string()))
    }

    fn input(&self, prompt: &str, default: &str) -> eosic_core::Result<String> {
        Self::require_terminal(prompt)?;
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default.to_string())
            .interact_text()
            .map_err(|e| CoreError::Prompt(e.to_string()))
    }
}
