//! Test support utilities for eosic-core
//!
//! Provides MockProvider and ScriptedPrompter for unit testing the resolver,
//! supervisor and facade without a container engine or a terminal.

use crate::{CoreError, Prompter};
use async_trait::async_trait;
use eosic_provider::*;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Ping,
    ListImages,
    Build {
        tag: String,
        context: PathBuf,
        dockerfile: String,
    },
    Create {
        image: String,
        name: Option<String>,
    },
    Start {
        id: String,
    },
    Stop {
        id: String,
        timeout: Option<u32>,
    },
    Remove {
        id: String,
        force: bool,
    },
    Inspect {
        id: String,
    },
    Exec {
        id: String,
        cmd: Vec<String>,
    },
    ExecExitCode {
        exec_id: String,
    },
}

/// Configurable mock container provider for testing
pub struct MockProvider {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    /// Result for list_images calls
    pub list_images_result: Arc<Mutex<Result<Vec<ImageSummary>>>>,
    /// Image list installed once a build stream has been handed out
    pub images_after_build: Arc<Mutex<Option<Vec<ImageSummary>>>>,
    /// Error for build calls (if Some, build returns this error)
    pub build_error: Arc<Mutex<Option<ProviderError>>>,
    /// Raw build-log chunks replayed by build calls
    pub build_output: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Result for create calls
    pub create_result: Arc<Mutex<Result<ContainerId>>>,
    pub last_create_config: Arc<Mutex<Option<CreateContainerConfig>>>,
    /// Result for start calls
    pub start_result: Arc<Mutex<Result<()>>>,
    /// Result for stop calls
    pub stop_result: Arc<Mutex<Result<()>>>,
    /// Result for remove calls
    pub remove_result: Arc<Mutex<Result<()>>>,
    /// Result for inspect calls
    pub inspect_result: Arc<Mutex<Result<ContainerDetails>>>,
    /// Raw attach-frame chunks replayed by exec calls
    pub exec_output: Arc<Mutex<Vec<Vec<u8>>>>,
    pub exec_exit_code: Arc<Mutex<Option<i64>>>,
    /// Error for exec calls (if Some, exec returns this error)
    pub exec_error: Arc<Mutex<Option<ProviderError>>>,
    pub last_exec_config: Arc<Mutex<Option<ExecConfig>>>,
}

impl MockProvider {
    /// Create a new mock provider with default success results and no images
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            list_images_result: Arc::new(Mutex::new(Ok(Vec::new()))),
            images_after_build: Arc::new(Mutex::new(None)),
            build_error: Arc::new(Mutex::new(None)),
            build_output: Arc::new(Mutex::new(Vec::new())),
            create_result: Arc::new(Mutex::new(Ok(ContainerId::new("mock_container_id")))),
            last_create_config: Arc::new(Mutex::new(None)),
            start_result: Arc::new(Mutex::new(Ok(()))),
            stop_result: Arc::new(Mutex::new(Ok(()))),
            remove_result: Arc::new(Mutex::new(Ok(()))),
            inspect_result: Arc::new(Mutex::new(Ok(mock_container_details(
                "mock_container_id",
                ContainerStatus::Running,
            )))),
            exec_output: Arc::new(Mutex::new(Vec::new())),
            exec_exit_code: Arc::new(Mutex::new(Some(0))),
            exec_error: Arc::new(Mutex::new(None)),
            last_exec_config: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_images(self, images: Vec<ImageSummary>) -> Self {
        *self.list_images_result.lock().unwrap() = Ok(images);
        self
    }

    pub fn with_images_after_build(self, images: Vec<ImageSummary>) -> Self {
        *self.images_after_build.lock().unwrap() = Some(images);
        self
    }

    pub fn with_build_output(self, chunks: Vec<Vec<u8>>) -> Self {
        *self.build_output.lock().unwrap() = chunks;
        self
    }

    /// Record a call
    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper to clone a Result<T> from an Arc<Mutex<Result<T>>>
fn clone_result<T: Clone>(r: &Arc<Mutex<Result<T>>>) -> Result<T> {
    let guard = r.lock().unwrap();
    match &*guard {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(clone_provider_error(e)),
    }
}

/// Clone a ProviderError (thiserror types don't implement Clone)
fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::ContainerNotFound(s) => ProviderError::ContainerNotFound(s.clone()),
        ProviderError::BuildError(s) => ProviderError::BuildError(s.clone()),
        ProviderError::ExecError(s) => ProviderError::ExecError(s.clone()),
        ProviderError::RuntimeError(s) => ProviderError::RuntimeError(s.clone()),
        ProviderError::Stream(s) => ProviderError::Stream(s.clone()),
        ProviderError::IoError(_) => ProviderError::RuntimeError("IO error (cloned)".into()),
    }
}

fn replay(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Create a mock ContainerDetails
pub fn mock_container_details(id: &str, status: ContainerStatus) -> ContainerDetails {
    ContainerDetails {
        id: ContainerId::new(id),
        name: "eosic-abc123".to_string(),
        image: "eosic/environment:latest".to_string(),
        status,
        exit_code: None,
        labels: HashMap::new(),
    }
}

#[async_trait]
impl ContainerProvider for MockProvider {
    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        self.record(MockCall::ListImages);
        clone_result(&self.list_images_result)
    }

    async fn build(&self, config: &BuildConfig) -> Result<ByteStream> {
        self.record(MockCall::Build {
            tag: config.tag.clone(),
            context: config.context.clone(),
            dockerfile: config.dockerfile.clone(),
        });
        if let Some(ref e) = *self.build_error.lock().unwrap() {
            return Err(clone_provider_error(e));
        }
        if let Some(images) = self.images_after_build.lock().unwrap().clone() {
            *self.list_images_result.lock().unwrap() = Ok(images);
        }
        Ok(replay(self.build_output.lock().unwrap().clone()))
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        self.record(MockCall::Create {
            image: config.image.clone(),
            name: config.name.clone(),
        });
        *self.last_create_config.lock().unwrap() = Some(config.clone());
        clone_result(&self.create_result)
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Start { id: id.0.clone() });
        clone_result(&self.start_result)
    }

    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()> {
        self.record(MockCall::Stop {
            id: id.0.clone(),
            timeout,
        });
        clone_result(&self.stop_result)
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(MockCall::Remove {
            id: id.0.clone(),
            force,
        });
        clone_result(&self.remove_result)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.record(MockCall::Inspect { id: id.0.clone() });
        clone_result(&self.inspect_result)
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecSession> {
        self.record(MockCall::Exec {
            id: id.0.clone(),
            cmd: config.cmd.clone(),
        });
        *self.last_exec_config.lock().unwrap() = Some(config.clone());
        if let Some(ref e) = *self.exec_error.lock().unwrap() {
            return Err(clone_provider_error(e));
        }
        Ok(ExecSession {
            id: "mock_exec_id".to_string(),
            output: replay(self.exec_output.lock().unwrap().clone()),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        self.record(MockCall::ExecExitCode {
            exec_id: exec_id.to_string(),
        });
        Ok(*self.exec_exit_code.lock().unwrap())
    }
}

/// Prompter answering from a script.
///
/// `select` fails once the scripted choices run out; `input` falls back to
/// the offered default.
#[derive(Default)]
pub struct ScriptedPrompter {
    choices: Mutex<VecDeque<usize>>,
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
    defaults: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for the next `select`
    pub fn choose(self, index: usize) -> Self {
        self.choices.lock().unwrap().push_back(index);
        self
    }

    /// Queue an answer for the next `input`
    pub fn answer(self, text: impl Into<String>) -> Self {
        self.answers.lock().unwrap().push_back(text.into());
        self
    }

    /// Prompts shown so far, in order
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }

    /// Defaults offered to `input`, in order
    pub fn defaults(&self) -> Vec<String> {
        self.defaults.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn select(&self, prompt: &str, items: &[&str], _default: usize) -> crate::Result<usize> {
        self.asked.lock().unwrap().push(prompt.to_string());
        let index = self
            .choices
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoreError::Prompt(format!("no scripted choice for {:?}", prompt)))?;
        if index >= items.len() {
            return Err(CoreError::Prompt(format!("choice {} out of range", index)));
        }
        Ok(index)
    }

    fn input(&self, prompt: &str, default: &str) -> crate::Result<String> {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.defaults.lock().unwrap().push(default.to_string());
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| default.to_string()))
    }
}
