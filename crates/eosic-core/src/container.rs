//! Fixed layout of the node environment container

use crate::ResolvedImage;
use eosic_provider::{CreateContainerConfig, MountConfig, PortConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Command the container runs: the node daemon wrapper script
pub const NODE_COMMAND: [&str; 4] = [
    "/opt/eosio/bin/nodeosd.sh",
    "--data-dir",
    "/opt/eosio/bin/data-dir",
    "-e",
];

/// HTTP API and peer-to-peer ports, published on the same host ports
pub const NODE_PORTS: [u16; 2] = [8888, 9876];

pub const CONTAINER_HOSTNAME: &str = "eosic";

pub const CONTAINER_NAME_PREFIX: &str = "eosic-";

/// Label marking containers created by eosic
pub const EOSIC_LABEL: &str = "eosic";
pub const EOSIC_VERSION_LABEL: &str = "eosic.version";

/// Scripts mounted from the support directory that must be made executable
/// after every start
pub const SETUP_SCRIPTS: [&str; 2] = ["/compile", "/eosiocppfix"];

/// Name of the environment container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `eosic-` followed by 6 random hex digits
    pub fn generate() -> Self {
        let bits = (uuid::Uuid::new_v4().as_u128() & 0xff_ffff) as u32;
        Self(format!("{}{:06x}", CONTAINER_NAME_PREFIX, bits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host directories bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Project working directory (`config.ini`, `playground/`, `contracts/`)
    pub project_root: PathBuf,
    /// Directory holding `.bashrc`, `eosiocppfix` and `compile`
    pub support_dir: PathBuf,
}

impl HostPaths {
    pub fn new(project_root: impl Into<PathBuf>, support_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            support_dir: support_dir.into(),
        }
    }
}

/// Everything the engine needs to create the environment container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: ContainerName,
    pub image: String,
    pub cmd: Vec<String>,
    pub hostname: String,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortConfig>,
    pub mounts: Vec<MountConfig>,
}

impl ContainerSpec {
    pub fn new(image: &ResolvedImage, name: ContainerName, paths: &HostPaths) -> Self {
        let mut labels = HashMap::new();
        labels.insert(EOSIC_LABEL.to_string(), "true".to_string());
        labels.insert(
            EOSIC_VERSION_LABEL.to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );

        Self {
            name,
            image: image.reference().to_string(),
            cmd: NODE_COMMAND.iter().map(|s| s.to_string()).collect(),
            hostname: CONTAINER_HOSTNAME.to_string(),
            labels,
            ports: NODE_PORTS.iter().map(|&p| PortConfig::same_tcp(p)).collect(),
            mounts: mounts(paths),
        }
    }

    pub fn create_config(&self) -> CreateContainerConfig {
        CreateContainerConfig {
            image: self.image.clone(),
            name: Some(self.name.to_string()),
            cmd: Some(self.cmd.clone()),
            env: HashMap::new(),
            mounts: self.mounts.clone(),
            ports: self.ports.clone(),
            labels: self.labels.clone(),
            hostname: Some(self.hostname.clone()),
            tty: false,
        }
    }
}

fn mounts(paths: &HostPaths) -> Vec<MountConfig> {
    let project = |rel: &str| host_path(&paths.project_root, rel);
    let support = |rel: &str| host_path(&paths.support_dir, rel);

    vec![
        MountConfig::bind(project("config.ini"), "/opt/eosio/bin/data-dir/config.ini"),
        MountConfig::bind(project("playground"), "/playground"),
        MountConfig::bind(project("contracts"), "/contracts"),
        MountConfig::bind(support(".bashrc"), "/.bashrc"),
        MountConfig::bind(support("eosiocppfix"), "/eosiocppfix"),
        MountConfig::bind(support("compile"), "/compile"),
    ]
}

fn host_path(dir: &Path, rel: &str) -> String {
    dir.join(rel).to_string_lossy().into_owned()
}
