//! `DockerEos`: the contract-build environment facade
//!
//! Ties image resolution and container supervision together behind one
//! object. Mutating operations take `&mut self`; an environment owns exactly
//! one container for its whole life.

use crate::container::{ContainerName, HostPaths};
use crate::image::{ImageRef, ImageResolver, ResolvedImage};
use crate::prompt::Prompter;
use crate::supervisor::{ContainerHandle, ContainerSupervisor, LifecycleState};
use crate::{CoreError, Result};
use eosic_config::GlobalConfig;
use eosic_provider::{ConsoleSink, ContainerProvider, LogSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Where an environment is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Uninitialized,
    ImageResolved,
    ContainerCreated,
    Running,
    Stopped,
    Removed,
}

impl std::fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::ImageResolved => write!(f, "image resolved"),
            Self::ContainerCreated => write!(f, "container created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Settings an environment is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOptions {
    pub image: ImageRef,
    /// Project directory; mounts and relative Dockerfile paths resolve here
    pub cwd: PathBuf,
    pub support_dir: PathBuf,
    /// Explicit container name; generated when `None`
    pub container_name: Option<String>,
    pub default_dockerfile: Option<PathBuf>,
    pub max_build_attempts: u32,
    pub stop_timeout_secs: u32,
}

impl EnvironmentOptions {
    /// Defaults for a project at `cwd`
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        Self {
            image: ImageRef::default(),
            support_dir: cwd.join("bin"),
            cwd,
            container_name: None,
            default_dockerfile: None,
            max_build_attempts: 1,
            stop_timeout_secs: 10,
        }
    }

    pub fn from_config(config: &GlobalConfig, cwd: &Path) -> Self {
        Self {
            image: ImageRef::from(&config.image),
            cwd: cwd.to_path_buf(),
            support_dir: config.container.effective_support_dir(cwd),
            container_name: config.container.name.clone(),
            default_dockerfile: config.image.dockerfile.clone(),
            max_build_attempts: config.image.max_build_attempts,
            stop_timeout_secs: config.container.stop_timeout_secs,
        }
    }

    pub fn host_paths(&self) -> HostPaths {
        HostPaths::new(&self.cwd, &self.support_dir)
    }
}

/// A containerized EOS node environment
pub struct DockerEos {
    provider: Arc<dyn ContainerProvider>,
    prompter: Arc<dyn Prompter>,
    options: EnvironmentOptions,
    image: Option<ResolvedImage>,
    supervisor: ContainerSupervisor,
    build_sink: Box<dyn LogSink>,
    removed: bool,
}

impl DockerEos {
    /// Create an uninitialized environment. Build output goes to the console.
    pub fn new(
        provider: Arc<dyn ContainerProvider>,
        prompter: Arc<dyn Prompter>,
        options: EnvironmentOptions,
    ) -> Self {
        let supervisor =
            ContainerSupervisor::new(Arc::clone(&provider)).with_stop_timeout(options.stop_timeout_secs);
        Self {
            provider,
            prompter,
            options,
            image: None,
            supervisor,
            build_sink: Box::new(ConsoleSink),
            removed: false,
        }
    }

    /// Send image build output somewhere other than the console
    pub fn with_build_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.build_sink = Box::new(sink);
        self
    }

    /// Create an environment and initialize it: resolve (or build) the
    /// image and create the container.
    pub async fn create(
        provider: Arc<dyn ContainerProvider>,
        prompter: Arc<dyn Prompter>,
        options: EnvironmentOptions,
    ) -> Result<Self> {
        let mut environment = Self::new(provider, prompter, options);
        environment.initialize().await?;
        Ok(environment)
    }

    /// Resolve the image if absent, then create the container if absent
    pub async fn initialize(&mut self) -> Result<()> {
        if self.removed {
            return Err(CoreError::InvalidState(
                "environment has been removed".to_string(),
            ));
        }

        if self.image.is_none() {
            let resolver = ImageResolver::new(
                self.provider.as_ref(),
                self.prompter.as_ref(),
                &self.options.cwd,
            )
            .with_default_dockerfile(self.options.default_dockerfile.clone())
            .with_max_build_attempts(self.options.max_build_attempts);

            let image = resolver
                .resolve(&self.options.image, self.build_sink.as_mut())
                .await?;
            self.image = Some(image);
        } else {
            debug!("Image already resolved");
        }

        if self.supervisor.handle().is_none() {
            let name = self
                .options
                .container_name
                .clone()
                .map(ContainerName::new)
                .unwrap_or_else(ContainerName::generate);
            let paths = self.options.host_paths();
            self.supervisor
                .create_container(self.image.as_ref(), name, &paths)
                .await?;
        } else {
            debug!("Container already created");
        }

        info!("Environment {}", self.state());
        Ok(())
    }

    /// Start the container
    pub async fn start(&mut self) -> Result<()> {
        self.supervisor.start().await
    }

    /// Stop the container
    pub async fn stop(&mut self) -> Result<()> {
        self.supervisor.stop().await
    }

    /// Remove the container. The environment cannot be used afterwards.
    pub async fn remove(&mut self) -> Result<()> {
        self.supervisor.remove().await?;
        self.removed = true;
        Ok(())
    }

    /// Compile `contracts/<name>` inside the container
    pub async fn compile(&self, contract: &str) -> Result<String> {
        self.supervisor.compile(contract).await
    }

    /// Run a command inside the container and return its output
    pub async fn exec<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd: Vec<String> = args.into_iter().map(Into::into).collect();
        if cmd.is_empty() {
            return Err(CoreError::InvalidState("no command given".to_string()));
        }
        self.supervisor.exec(cmd).await
    }

    pub fn state(&self) -> EnvironmentState {
        if self.removed {
            return EnvironmentState::Removed;
        }
        match self.supervisor.handle().map(|h| h.state) {
            Some(LifecycleState::Created) => EnvironmentState::ContainerCreated,
            Some(LifecycleState::Running) => EnvironmentState::Running,
            Some(LifecycleState::Stopped) => EnvironmentState::Stopped,
            Some(LifecycleState::Removed) => EnvironmentState::Removed,
            None if self.image.is_some() => EnvironmentState::ImageResolved,
            None => EnvironmentState::Uninitialized,
        }
    }

    pub fn image(&self) -> Option<&ResolvedImage> {
        self.image.as_ref()
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.supervisor.handle()
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }
}
