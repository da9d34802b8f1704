//! Interactive questions asked while resolving the environment image

use crate::Result;
use std::path::{Path, PathBuf};

/// Asks the user questions.
///
/// The CLI answers with terminal prompts; tests script the answers.
pub trait Prompter: Send + Sync {
    /// Pick one of `items`, returning its index
    fn select(&self, prompt: &str, items: &[&str], default: usize) -> Result<usize>;

    /// Free-form text, `default` when the user just presses enter
    fn input(&self, prompt: &str, default: &str) -> Result<String>;
}

/// Answers to the "no image available" question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageChoice {
    Build,
    SelectPrebuilt,
    Cancel,
}

impl ImageChoice {
    pub const PROMPT: &'static str = "Should EOSIC build brand new docker image to operate?";

    /// Choices in the order they are offered
    pub const ALL: [ImageChoice; 3] = [Self::Build, Self::SelectPrebuilt, Self::Cancel];

    pub fn label(self) -> &'static str {
        match self {
            Self::Build => "Yes",
            Self::SelectPrebuilt => "Select prebuilded image",
            Self::Cancel => "Cancel",
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn labels() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.label()).collect()
    }
}

/// Prompt text for the Dockerfile location
pub const DOCKERFILE_PROMPT: &str = "Path to Dockerfile";

/// Expand `~` and resolve a user-entered path against `cwd`
pub fn normalize_path(input: &str, cwd: &Path) -> PathBuf {
    let trimmed = input.trim();
    let expanded = shellexpand::tilde(trimmed);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
