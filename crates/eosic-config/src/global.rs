//! Global configuration for eosic
//!
//! Located at `~/.config/eosic/config.toml`, or under `$EOSIC_CONFIG_DIR` when set.

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default image repository for the node environment
pub const DEFAULT_IMAGE_REPOSITORY: &str = "eosic/environment";

/// Default image tag for the node environment
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "EOSIC_CONFIG_DIR";

/// Environment variable overriding the support files directory
pub const SUPPORT_DIR_ENV: &str = "EOSIC_SUPPORT_DIR";

/// Global eosic configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub engine: EngineConfig,
    pub image: ImageConfig,
    pub container: ContainerConfig,
}

/// Container engine connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine API socket (unix path, `unix://` or `http(s)://` URL)
    pub socket: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            timeout_secs: 120,
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Image lookup and build settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub repository: String,
    pub tag: String,
    /// Default offered when asking for a Dockerfile to build from.
    /// Falls back to `<cwd>/Dockerfile` when unset.
    pub dockerfile: Option<PathBuf>,
    /// How many prompted builds may run before resolution gives up
    pub max_build_attempts: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
            dockerfile: None,
            max_build_attempts: 1,
        }
    }
}

/// Container creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Directory holding `.bashrc`, `eosiocppfix` and `compile`
    pub support_dir: Option<PathBuf>,
    /// Explicit container name; generated when unset
    pub name: Option<String>,
    /// Seconds the engine waits before killing the node on stop
    pub stop_timeout_secs: u32,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            support_dir: None,
            name: None,
            stop_timeout_secs: 10,
        }
    }
}

impl ContainerConfig {
    /// Resolve the support files directory.
    ///
    /// Order: `$EOSIC_SUPPORT_DIR`, the configured `support_dir`, then
    /// `<install prefix>/share/eosic` next to the running executable,
    /// then `<cwd>/bin`.
    pub fn effective_support_dir(&self, cwd: &Path) -> PathBuf {
        if let Ok(dir) = std::env::var(SUPPORT_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        if let Some(ref dir) = self.support_dir {
            return if dir.is_absolute() {
                dir.clone()
            } else {
                cwd.join(dir)
            };
        }

        let installed = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().and_then(|bin| bin.parent()).map(Path::to_path_buf))
            .map(|prefix| prefix.join("share").join("eosic"));
        match installed {
            Some(dir) if dir.is_dir() => dir,
            _ => cwd.join("bin"),
        }
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);

        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content = self.to_toml()?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Render the configuration as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject values the engine would only fail on later
    pub fn validate(&self) -> Result<()> {
        if self.image.repository.trim().is_empty() {
            return Err(ConfigError::Invalid("image.repository must not be empty".into()));
        }
        if self.image.tag.trim().is_empty() {
            return Err(ConfigError::Invalid("image.tag must not be empty".into()));
        }
        if self.image.max_build_attempts == 0 {
            return Err(ConfigError::Invalid(
                "image.max_build_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir).join("config.toml"));
            }
        }
        let dirs = ProjectDirs::from("", "", "eosic").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.image.repository, "eosic/environment");
        assert_eq!(config.image.tag, "latest");
        assert_eq!(config.image.max_build_attempts, 1);
        assert_eq!(config.container.stop_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[engine]
socket = "unix:///run/user/1000/docker.sock"

[image]
tag = "v1.4.1"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.engine.socket, "unix:///run/user/1000/docker.sock");
        assert_eq!(config.engine.timeout_secs, 120);
        assert_eq!(config.image.repository, "eosic/environment");
        assert_eq!(config.image.tag, "v1.4.1");
        assert!(config.container.name.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut config = GlobalConfig::default();
        config.image.repository = "acme/node".to_string();
        config.container.name = Some("eosic-fixed".to_string());
        config.save_to(&path).unwrap();

        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_attempts_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[image]\nmax_build_attempts = 0\n").unwrap();

        let err = GlobalConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_relative_support_dir_joins_cwd() {
        let config = ContainerConfig {
            support_dir: Some(PathBuf::from("tools")),
            ..Default::default()
        };
        // Only meaningful when the override variable is absent
        if std::env::var(SUPPORT_DIR_ENV).is_err() {
            assert_eq!(
                config.effective_support_dir(Path::new("/work")),
                PathBuf::from("/work/tools")
            );
        }
    }
}
