//! Project store backed by `eosic.json`

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the project store inside a project root
pub const PROJECT_FILE: &str = "eosic.json";

/// Contents of `eosic.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Glob for test files, relative to the project root
    pub tests: String,
    /// Migrations directory, relative to the project root
    pub migrations: String,
    pub contracts: BTreeMap<String, ContractConfig>,
}

/// A contract entry in `eosic.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Entry source file, relative to the contract directory
    #[serde(default)]
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// A resolved contract inside a project
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    /// Absolute contract directory (`<root>/contracts/<name>`)
    pub root: PathBuf,
    pub config: ContractConfig,
}

impl Contract {
    /// Path of the contract's entry source file
    pub fn entry_path(&self) -> PathBuf {
        self.root.join(&self.config.entry)
    }
}

/// A loaded eosic project
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    /// Create a project from an absolute root and an in-memory config
    pub fn new(root: impl Into<PathBuf>, config: ProjectConfig) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "Project root must be absolute: {}",
                root.display()
            )));
        }
        Ok(Self { root, config })
    }

    /// Load `eosic.json` from a project root
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PROJECT_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: ProjectConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::JsonParseError {
                path: path.clone(),
                source: e,
            })?;

        tracing::debug!("Loaded project {:?} from {:?}", config.name, path);
        Self::new(root, config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(PROJECT_FILE)
    }

    pub fn contracts_path(&self) -> PathBuf {
        self.root.join("contracts")
    }

    /// Write the project back to `eosic.json`
    pub fn save(&self) -> Result<()> {
        let path = self.config_path();
        let json = serde_json::to_string_pretty(&self.config)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| ConfigError::WriteError { path, source: e })
    }

    /// Register a contract and persist the project.
    ///
    /// The contract directory must already exist under `contracts/`.
    pub fn add_contract(&mut self, config: ContractConfig) -> Result<Contract> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::Invalid("Contract name must not be empty".into()));
        }
        let root = self.contracts_path().join(&config.name);
        if !root.is_dir() {
            return Err(ConfigError::ContractNotFound(config.name));
        }

        self.config
            .contracts
            .insert(config.name.clone(), config.clone());
        self.save()?;

        Ok(Contract { root, config })
    }

    /// Look up a registered contract by name
    pub fn contract(&self, name: &str) -> Result<Contract> {
        let config = self
            .config
            .contracts
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::ContractNotFound(name.to_string()))?;

        Ok(Contract {
            root: self.contracts_path().join(name),
            config,
        })
    }
}
