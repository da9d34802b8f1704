//! Common types for container providers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Container status as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ContainerStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// An image known to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    /// `repository:tag` references, in engine order
    pub repo_tags: Vec<String>,
}

impl ImageSummary {
    pub fn new(id: impl Into<String>, repo_tags: &[&str]) -> Self {
        Self {
            id: id.into(),
            repo_tags: repo_tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Build configuration for creating images
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Directory used as the build context
    pub context: PathBuf,
    /// Dockerfile name inside the context; also the only file sent to the engine
    pub dockerfile: String,
    /// Image tag (`repository:tag`)
    pub tag: String,
    /// Labels to apply
    pub labels: HashMap<String, String>,
    /// No cache
    pub no_cache: bool,
    /// Pull base image
    pub pull: bool,
}

/// Configuration for creating a container
#[derive(Debug, Clone, Default)]
pub struct CreateContainerConfig {
    /// Image to use
    pub image: String,
    /// Container name
    pub name: Option<String>,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Bind mounts
    pub mounts: Vec<MountConfig>,
    /// Port mappings
    pub ports: Vec<PortConfig>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Hostname
    pub hostname: Option<String>,
    /// Allocate TTY
    pub tty: bool,
}

/// Host path bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Absolute path on the host
    pub source: String,
    /// Target path in container
    pub target: String,
    pub read_only: bool,
}

impl MountConfig {
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Render as an engine bind string (`source:target[:ro]`)
    pub fn to_bind_string(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Host port (None for auto-assign)
    pub host_port: Option<u16>,
    /// Container port
    pub container_port: u16,
    /// Protocol (tcp/udp)
    pub protocol: String,
    /// Host IP to bind to
    pub host_ip: Option<String>,
}

impl PortConfig {
    /// Same port on both sides, all host interfaces
    pub fn same_tcp(port: u16) -> Self {
        Self {
            host_port: Some(port),
            container_port: port,
            protocol: "tcp".to_string(),
            host_ip: None,
        }
    }

    /// Engine port key, e.g. `8888/tcp`
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Exec configuration
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Command to execute
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Allocate a pseudo-terminal
    pub tty: bool,
}

/// Detailed container information
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
}
