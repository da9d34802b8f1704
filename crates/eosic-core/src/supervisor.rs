//! Lifecycle of the one container an environment owns

use crate::container::{ContainerName, ContainerSpec, HostPaths, SETUP_SCRIPTS};
use crate::{CoreError, ResolvedImage, Result};
use eosic_provider::demux::demux_frames;
use eosic_provider::{ContainerId, ContainerProvider, ContainerStatus, ExecConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Local view of the container's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
    Removed,
}

impl LifecycleState {
    /// Map an engine status onto the local lifecycle, `None` when unknown
    pub fn from_engine(status: ContainerStatus) -> Option<Self> {
        match status {
            ContainerStatus::Created => Some(Self::Created),
            ContainerStatus::Running | ContainerStatus::Paused | ContainerStatus::Restarting => {
                Some(Self::Running)
            }
            ContainerStatus::Exited | ContainerStatus::Dead | ContainerStatus::Removing => {
                Some(Self::Stopped)
            }
            ContainerStatus::Unknown => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Engine id, name and cached state of the environment container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: ContainerId,
    pub name: ContainerName,
    pub state: LifecycleState,
}

/// Merged output and exit code of a finished exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: String,
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        matches!(self.exit_code, None | Some(0))
    }
}

/// Creates and drives exactly one container
pub struct ContainerSupervisor {
    provider: Arc<dyn ContainerProvider>,
    handle: Option<ContainerHandle>,
    stop_timeout: Option<u32>,
}

impl ContainerSupervisor {
    pub fn new(provider: Arc<dyn ContainerProvider>) -> Self {
        Self {
            provider,
            handle: None,
            stop_timeout: None,
        }
    }

    /// Seconds the engine waits before killing the container on stop
    pub fn with_stop_timeout(mut self, secs: u32) -> Self {
        self.stop_timeout = Some(secs);
        self
    }

    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Create (but do not start) the environment container
    pub async fn create_container(
        &mut self,
        image: Option<&ResolvedImage>,
        name: ContainerName,
        paths: &HostPaths,
    ) -> Result<ContainerHandle> {
        let image = image.ok_or_else(|| CoreError::NotFound("image".to_string()))?;
        if let Some(ref handle) = self.handle {
            return Err(CoreError::InvalidState(format!(
                "container {} already created",
                handle.name
            )));
        }

        let spec = ContainerSpec::new(image, name, paths);
        debug!("Creating container {} from {}", spec.name, spec.image);
        let id = self.provider.create(&spec.create_config()).await?;
        info!("Created container {} ({})", spec.name, id.short());

        let handle = ContainerHandle {
            id,
            name: spec.name,
            state: LifecycleState::Created,
        };
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Start the container and make the support scripts executable
    pub async fn start(&mut self) -> Result<()> {
        self.require_handle()?;
        self.sync_state().await;

        let handle = self.require_handle()?;
        let (id, name) = (handle.id.clone(), handle.name.clone());
        if handle.state == LifecycleState::Running {
            debug!("Container {} already running", name);
        } else {
            debug!("Starting container {}", name);
            self.provider.start(&id).await?;
        }
        self.set_state(LifecycleState::Running);

        for script in SETUP_SCRIPTS {
            let cmd = vec!["bash".to_string(), "-c".to_string(), format!("chmod +x {}", script)];
            let result = self.exec_with_status(cmd).await?;
            if !result.success() {
                return Err(CoreError::ExecFailed(format!(
                    "chmod +x {} exited with {}: {}",
                    script,
                    result.exit_code.unwrap_or_default(),
                    result.output.trim()
                )));
            }
        }

        info!("Container {} running", name);
        Ok(())
    }

    /// Stop the container. The engine call is issued even if the container
    /// already looks stopped.
    pub async fn stop(&mut self) -> Result<()> {
        self.require_handle()?;
        self.sync_state().await;

        let handle = self.require_handle()?;
        let (id, name) = (handle.id.clone(), handle.name.clone());
        debug!("Stopping container {} (was {})", name, handle.state);
        self.provider.stop(&id, self.stop_timeout).await?;
        self.set_state(LifecycleState::Stopped);

        info!("Container {} stopped", name);
        Ok(())
    }

    /// Remove the container and discard the handle
    pub async fn remove(&mut self) -> Result<()> {
        self.require_handle()?;
        self.sync_state().await;

        let handle = self.require_handle()?;
        let (id, name) = (handle.id.clone(), handle.name.clone());
        debug!("Removing container {} (was {})", name, handle.state);
        self.provider.remove(&id, false).await?;
        self.handle = None;

        info!("Container {} removed", name);
        Ok(())
    }

    /// Run a command in the container and return its merged output
    pub async fn exec(&self, cmd: Vec<String>) -> Result<String> {
        let result = self.exec_with_status(cmd).await?;
        if !result.success() {
            warn!(
                "Command exited with {}",
                result.exit_code.unwrap_or_default()
            );
        }
        Ok(result.output)
    }

    /// Run a command in the container, keeping the exit code
    pub async fn exec_with_status(&self, cmd: Vec<String>) -> Result<ExecOutput> {
        let handle = self.require_handle()?;
        debug!("Exec in {}: {:?}", handle.name, cmd);

        let config = ExecConfig {
            cmd,
            tty: true,
            ..Default::default()
        };
        let session = self.provider.exec(&handle.id, &config).await?;

        let mut output = String::new();
        demux_frames(session.output, &mut output).await?;
        let exit_code = self.provider.exec_exit_code(&session.id).await?;

        Ok(ExecOutput { output, exit_code })
    }

    /// Compile a contract with the `/compile` support script
    pub async fn compile(&self, contract: &str) -> Result<String> {
        info!("Compiling contract {}", contract);
        self.exec(compile_command(contract)).await
    }

    fn require_handle(&self) -> Result<&ContainerHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| CoreError::NotFound("container".to_string()))
    }

    fn set_state(&mut self, state: LifecycleState) {
        if let Some(handle) = self.handle.as_mut() {
            handle.state = state;
        }
    }

    /// Refresh the cached state from the engine. Failures keep the cache.
    async fn sync_state(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        match self.provider.inspect(&handle.id).await {
            Ok(details) => match LifecycleState::from_engine(details.status) {
                Some(state) if state != handle.state => {
                    debug!("Container {} is {} (cached {})", handle.name, state, handle.state);
                    handle.state = state;
                }
                Some(_) => {}
                None => debug!("Container {} reports unknown status", handle.name),
            },
            Err(e) => warn!("Could not refresh state of {}: {}", handle.name, e),
        }
    }
}

/// `bash -c "/compile <contract>"`
pub fn compile_command(contract: &str) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        format!("/compile {}", contract),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_container_details, MockCall, MockProvider};
    use eosic_provider::demux::{encode_frame, STDERR_STREAM, STDOUT_STREAM};
    use eosic_provider::ProviderError;

    fn image() -> ResolvedImage {
        ResolvedImage {
            id: "sha256:eos".into(),
            repo_tags: vec!["eosic/environment:latest".into()],
        }
    }

    fn paths() -> HostPaths {
        HostPaths::new("/work/token", "/work/token/bin")
    }

    async fn created(mock: MockProvider) -> ContainerSupervisor {
        let mut supervisor = ContainerSupervisor::new(Arc::new(mock));
        supervisor
            .create_container(Some(&image()), ContainerName::new("eosic-abc123"), &paths())
            .await
            .unwrap();
        supervisor
    }

    fn exec_cmds(calls: &[MockCall]) -> Vec<Vec<String>> {
        calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Exec { cmd, .. } => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_state_from_engine() {
        assert_eq!(
            LifecycleState::from_engine(ContainerStatus::Running),
            Some(LifecycleState::Running)
        );
        assert_eq!(
            LifecycleState::from_engine(ContainerStatus::Exited),
            Some(LifecycleState::Stopped)
        );
        assert_eq!(LifecycleState::from_engine(ContainerStatus::Unknown), None);
    }

    #[test]
    fn test_compile_command() {
        assert_eq!(compile_command("token"), vec!["bash", "-c", "/compile token"]);
    }

    #[tokio::test]
    async fn test_create_requires_image() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let mut supervisor = ContainerSupervisor::new(Arc::new(mock));

        let err = supervisor
            .create_container(None, ContainerName::new("eosic-abc123"), &paths())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::NotFound(ref what) if what == "image"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_uses_spec() {
        let mock = MockProvider::new();
        let last = mock.last_create_config.clone();
        let supervisor = created(mock).await;

        let handle = supervisor.handle().unwrap();
        assert_eq!(handle.state, LifecycleState::Created);
        assert_eq!(handle.name.as_str(), "eosic-abc123");

        let config = last.lock().unwrap().clone().unwrap();
        assert_eq!(config.image, "eosic/environment:latest");
        assert_eq!(config.name.as_deref(), Some("eosic-abc123"));
        assert_eq!(config.mounts.len(), 6);
    }

    #[tokio::test]
    async fn test_create_twice_rejected() {
        let mut supervisor = created(MockProvider::new()).await;
        let err = supervisor
            .create_container(Some(&image()), ContainerName::new("eosic-def456"), &paths())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_start_without_container_makes_no_calls() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let mut supervisor = ContainerSupervisor::new(Arc::new(mock));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(ref what) if what == "container"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_remove_exec_without_container() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let mut supervisor = ContainerSupervisor::new(Arc::new(mock));

        assert!(matches!(supervisor.stop().await, Err(CoreError::NotFound(_))));
        assert!(matches!(supervisor.remove().await, Err(CoreError::NotFound(_))));
        assert!(matches!(
            supervisor.exec(vec!["ls".into()]).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(supervisor.compile("token").await, Err(CoreError::NotFound(_))));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_runs_setup_in_order() {
        let mock = MockProvider::new();
        *mock.inspect_result.lock().unwrap() =
            Ok(mock_container_details("mock_container_id", ContainerStatus::Created));
        let calls = mock.calls.clone();
        let mut supervisor = created(mock).await;

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.handle().unwrap().state, LifecycleState::Running);

        let calls = calls.lock().unwrap().clone();
        let start_pos = calls
            .iter()
            .position(|c| matches!(c, MockCall::Start { .. }))
            .unwrap();
        let first_exec = calls
            .iter()
            .position(|c| matches!(c, MockCall::Exec { .. }))
            .unwrap();
        assert!(start_pos < first_exec);
        assert_eq!(
            exec_cmds(&calls),
            vec![
                vec!["bash", "-c", "chmod +x /compile"],
                vec!["bash", "-c", "chmod +x /eosiocppfix"],
            ]
        );
    }

    #[tokio::test]
    async fn test_start_skips_engine_start_when_running() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let mut supervisor = created(mock).await;

        supervisor.start().await.unwrap();

        let calls = calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| matches!(c, MockCall::Start { .. })));
        assert_eq!(exec_cmds(&calls).len(), 2);
    }

    #[tokio::test]
    async fn test_start_fails_when_setup_fails() {
        let mock = MockProvider::new();
        *mock.exec_exit_code.lock().unwrap() = Some(1);
        *mock.exec_output.lock().unwrap() =
            vec![encode_frame(STDERR_STREAM, b"chmod: cannot access '/compile'\n")];
        let calls = mock.calls.clone();
        let mut supervisor = created(mock).await;

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, CoreError::ExecFailed(ref msg) if msg.contains("/compile")));
        assert_eq!(exec_cmds(&calls.lock().unwrap()).len(), 1);
    }

    #[tokio::test]
    async fn test_stop_twice_calls_engine_twice() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let mut supervisor = created(mock).await;

        supervisor.stop().await.unwrap();
        supervisor.stop().await.unwrap();

        let stops = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::Stop { .. }))
            .count();
        assert_eq!(stops, 2);
        assert_eq!(supervisor.handle().unwrap().state, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_passes_timeout() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let mut supervisor = ContainerSupervisor::new(Arc::new(mock)).with_stop_timeout(3);
        supervisor
            .create_container(Some(&image()), ContainerName::new("eosic-abc123"), &paths())
            .await
            .unwrap();

        supervisor.stop().await.unwrap();
        assert!(calls.lock().unwrap().contains(&MockCall::Stop {
            id: "mock_container_id".into(),
            timeout: Some(3),
        }));
    }

    #[tokio::test]
    async fn test_inspect_failure_keeps_cached_state() {
        let mock = MockProvider::new();
        *mock.inspect_result.lock().unwrap() =
            Err(ProviderError::RuntimeError("inspect unavailable".into()));
        let calls = mock.calls.clone();
        let mut supervisor = created(mock).await;

        supervisor.start().await.unwrap();

        assert!(calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| matches!(c, MockCall::Start { .. })));
        assert_eq!(supervisor.handle().unwrap().state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_remove_discards_handle() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let mut supervisor = created(mock).await;

        supervisor.remove().await.unwrap();
        assert!(supervisor.handle().is_none());
        assert!(calls.lock().unwrap().contains(&MockCall::Remove {
            id: "mock_container_id".into(),
            force: false,
        }));

        assert!(matches!(supervisor.remove().await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_exec_merges_stdout_and_stderr() {
        let mock = MockProvider::new();
        *mock.exec_output.lock().unwrap() = vec![
            encode_frame(STDOUT_STREAM, b"compiling token\n"),
            encode_frame(STDERR_STREAM, b"warning: unused\n"),
            encode_frame(STDOUT_STREAM, b"done\n"),
        ];
        let supervisor = created(mock).await;

        let output = supervisor.exec(vec!["ls".into()]).await.unwrap();
        assert_eq!(output, "compiling token\nwarning: unused\ndone\n");
    }

    #[tokio::test]
    async fn test_exec_nonzero_still_returns_output() {
        let mock = MockProvider::new();
        *mock.exec_exit_code.lock().unwrap() = Some(2);
        *mock.exec_output.lock().unwrap() =
            vec![encode_frame(STDOUT_STREAM, b"token.cpp:3: error\n")];
        let supervisor = created(mock).await;

        let output = supervisor.compile("token").await.unwrap();
        assert_eq!(output, "token.cpp:3: error\n");
    }

    #[tokio::test]
    async fn test_exec_uses_tty() {
        let mock = MockProvider::new();
        let last = mock.last_exec_config.clone();
        let supervisor = created(mock).await;

        supervisor.compile("token").await.unwrap();
        let config = last.lock().unwrap().clone().unwrap();
        assert!(config.tty);
        assert_eq!(config.cmd, vec!["bash", "-c", "/compile token"]);
    }

    #[tokio::test]
    async fn test_exec_error_propagates() {
        let mock = MockProvider::new();
        *mock.exec_error.lock().unwrap() = Some(ProviderError::ExecError("not running".into()));
        let supervisor = created(mock).await;

        let err = supervisor.exec(vec!["ls".into()]).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider(ProviderError::ExecError(_))));
    }
}
