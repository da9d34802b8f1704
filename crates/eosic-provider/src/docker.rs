//! Docker provider implementation using bollard
//!
//! bollard hands back build messages and attach output already decoded.
//! Both are re-encoded here into their wire shape (build-log JSON lines and
//! 8-byte-header attach frames) and decoded again by `demux`, so the real
//! engine and the test mock feed the same decoder.

use crate::demux::{encode_frame, BuildLogRecord, STDERR_STREAM, STDOUT_STREAM};
use crate::{
    BuildConfig, ByteStream, ContainerDetails, ContainerId, ContainerProvider, ContainerStatus,
    CreateContainerConfig, ExecConfig, ExecSession, ImageSummary, MountConfig, ProviderError,
    Result,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::service::{BuildInfo, HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Build-log lines buffered between the build task and the caller
const BUILD_CHANNEL_CAPACITY: usize = 64;

/// Docker provider using bollard crate
pub struct DockerProvider {
    client: Docker,
}

impl DockerProvider {
    /// Create a new Docker provider. No request is made until the first call.
    pub fn new(socket_path: &str, timeout_secs: u64) -> Result<Self> {
        let client = if socket_path.is_empty() {
            Docker::connect_with_local_defaults()
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else if socket_path.starts_with("unix://") || socket_path.starts_with('/') {
            let path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else if socket_path.starts_with("http://") || socket_path.starts_with("https://") {
            Docker::connect_with_http(socket_path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else {
            // Named pipes and bare socket paths
            Docker::connect_with_socket(socket_path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        };

        tracing::debug!("Container engine client for {:?}", socket_path);
        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };

        let images = self.client.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
            })
            .collect())
    }

    async fn build(&self, config: &BuildConfig) -> Result<ByteStream> {
        let tar_data = create_build_context(&config.context, &config.dockerfile)?;

        let options = BuildImageOptions {
            dockerfile: config.dockerfile.clone(),
            t: config.tag.clone(),
            nocache: config.no_cache,
            pull: config.pull,
            rm: true,
            labels: config.labels.clone(),
            ..Default::default()
        };

        tracing::debug!(
            "Building {} from {:?} ({} byte context)",
            config.tag,
            config.context,
            tar_data.len()
        );

        // The bollard stream borrows the client, so a task owning a clone
        // drives it and forwards each line.
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel(BUILD_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = Box::pin(client.build_image(options, None, Some(tar_data.into())));
            while let Some(item) = stream.next().await {
                let line = match item {
                    Ok(info) => Ok(build_info_line(info)),
                    Err(e) => Err(ProviderError::Stream(e.to_string())),
                };
                if tx.send(line).await.is_err() {
                    tracing::debug!("Build output receiver dropped");
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        let options = config.name.as_ref().map(|name| CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        });

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &config.ports {
            exposed_ports.insert(port.key(), HashMap::new());

            let binding = PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: port.host_port.map(|p| p.to_string()),
            };
            port_bindings.insert(port.key(), Some(vec![binding]));
        }

        let binds: Vec<String> = config
            .mounts
            .iter()
            .map(MountConfig::to_bind_string)
            .collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            hostname: config.hostname.clone(),
            tty: Some(config.tty),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(options, container_config)
            .await?;

        for warning in &response.warnings {
            tracing::warn!("Engine warning: {}", warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.unwrap_or(10) as i64,
        };
        self.client.stop_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client.remove_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let info = self.client.inspect_container(&id.0, None).await?;

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerStatus::Unknown);

        let config = info.config.as_ref();

        Ok(ContainerDetails {
            id: id.clone(),
            name: info
                .name
                .clone()
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            status,
            exit_code: state.and_then(|s| s.exit_code),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
        })
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecSession> {
        let options = CreateExecOptions {
            cmd: Some(config.cmd.clone()),
            env: Some(
                config
                    .env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            tty: Some(config.tty),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.client.create_exec(&id.0, options).await?;

        let start_options = StartExecOptions {
            detach: false,
            tty: config.tty,
            ..Default::default()
        };

        match self.client.start_exec(&exec.id, Some(start_options)).await? {
            StartExecResults::Attached { output, .. } => {
                let framed = output.map(|chunk| match chunk {
                    Ok(output) => Ok(reframe(output)),
                    Err(e) => Err(ProviderError::Stream(e.to_string())),
                });
                Ok(ExecSession {
                    id: exec.id,
                    output: Box::pin(framed),
                })
            }
            StartExecResults::Detached => Err(ProviderError::ExecError(
                "Exec started in detached mode".to_string(),
            )),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self.client.inspect_exec(exec_id).await?;
        Ok(inspect.exit_code)
    }
}

/// Render one decoded build message back into its JSON line
fn build_info_line(info: BuildInfo) -> Vec<u8> {
    BuildLogRecord {
        stream: info.stream,
        status: info.status,
        error: info.error,
        aux: info
            .aux
            .and_then(|aux| aux.id)
            .map(|id| serde_json::json!({ "ID": id })),
    }
    .to_line()
}

/// Frame one chunk of attached output
fn reframe(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdErr { message } => encode_frame(STDERR_STREAM, &message),
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            encode_frame(STDOUT_STREAM, &message)
        }
        LogOutput::StdIn { message } => encode_frame(0, &message),
    }
}

/// Create the build context archive.
///
/// Only the Dockerfile itself is sent, under its own name.
fn create_build_context(context: &Path, dockerfile: &str) -> Result<Vec<u8>> {
    use std::io::Cursor;
    use tar::Builder;

    let dockerfile_path = context.join(dockerfile);
    if !dockerfile_path.is_file() {
        return Err(ProviderError::BuildError(format!(
            "Dockerfile not found at {}",
            dockerfile_path.display()
        )));
    }

    let mut tar_data = Vec::new();
    {
        let cursor = Cursor::new(&mut tar_data);
        let mut builder = Builder::new(cursor);

        builder.append_path_with_name(&dockerfile_path, dockerfile)?;
        builder.finish()?;
    }

    Ok(tar_data)
}
