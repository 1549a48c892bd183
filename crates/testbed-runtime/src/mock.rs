//! In-memory container runtime for tests.
//!
//! Behaves like a very small engine: images must exist before a container
//! can be created from them, names are unique, and killing a stopped
//! container fails. Log output and exec results are scripted up front.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use testbed_common::error::{Result, TestbedError};
use testbed_common::types::{ContainerId, ContainerState};

use crate::backend::{
    BuildRequest, ContainerConfig, ContainerInfo, ContainerRuntime, HostPort, LogStream,
};
use crate::exec::ExecOutput;

/// First host port handed out for [`HostPort::Any`].
const FIRST_EPHEMERAL_PORT: u16 = 32768;

/// Scripted log output for one `logs` call.
#[derive(Debug, Clone, Default)]
pub struct LogScript {
    /// Lines emitted in order, each newline-terminated.
    pub lines: Vec<String>,
    /// Keep the stream open after the last line instead of ending it.
    pub then_hang: bool,
}

impl LogScript {
    /// Emits `lines` and then ends the stream.
    #[must_use]
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            then_hang: false,
        }
    }

    /// Emits `lines` and then never ends.
    #[must_use]
    pub fn hanging<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            then_hang: true,
            ..Self::lines(lines)
        }
    }
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: ContainerId,
    config: ContainerConfig,
    state: ContainerState,
    ports: HashMap<u16, u16>,
}

#[derive(Debug, Default)]
struct State {
    images: HashSet<String>,
    failing_pulls: HashSet<String>,
    pulls: Vec<String>,
    builds: Vec<String>,
    commits: Vec<String>,
    containers: Vec<MockContainer>,
    created: Vec<String>,
    killed: Vec<String>,
    removed: Vec<String>,
    execs: Vec<(String, Vec<String>)>,
    log_scripts: VecDeque<LogScript>,
    default_logs: LogScript,
    exec_outputs: VecDeque<ExecOutput>,
    next_id: u32,
    next_port: u16,
}

impl State {
    fn find(&self, container: &str) -> Option<&MockContainer> {
        self.containers
            .iter()
            .find(|c| c.id.as_str() == container || c.config.name == container)
    }

    fn find_mut(&mut self, container: &str) -> Option<&mut MockContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.id.as_str() == container || c.config.name == container)
    }
}

fn missing(container: &str) -> TestbedError {
    TestbedError::NotFound {
        kind: "container",
        id: container.to_string(),
    }
}

fn info(container: &MockContainer) -> ContainerInfo {
    ContainerInfo {
        id: container.id.clone(),
        name: container.config.name.clone(),
        state: container.state,
        image: container.config.image.clone(),
        ports: container.ports.clone(),
    }
}

/// A [`ContainerRuntime`] that keeps all state in memory.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    /// Creates an empty runtime with no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `image` present locally.
    #[must_use]
    pub fn with_image(self, image: &str) -> Self {
        let _ = self.state().images.insert(image.to_string());
        self
    }

    /// Sets the log output used once the scripted queue is empty.
    #[must_use]
    pub fn with_default_logs(self, script: LogScript) -> Self {
        self.state().default_logs = script;
        self
    }

    /// Queues the log output for the next `logs` call.
    pub fn push_logs(&self, script: LogScript) {
        self.state().log_scripts.push_back(script);
    }

    /// Queues the result of the next `exec` call. Unqueued execs succeed
    /// with no output.
    pub fn push_exec_output(&self, output: ExecOutput) {
        self.state().exec_outputs.push_back(output);
    }

    /// Makes pulls of `image` fail.
    pub fn fail_pull(&self, image: &str) {
        let _ = self.state().failing_pulls.insert(image.to_string());
    }

    /// Returns whether `image` is present.
    #[must_use]
    pub fn has_image(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    /// Names of all containers ever created, in order.
    #[must_use]
    pub fn created_names(&self) -> Vec<String> {
        self.state().created.clone()
    }

    /// Names of containers currently running.
    #[must_use]
    pub fn running_names(&self) -> Vec<String> {
        self.state()
            .containers
            .iter()
            .filter(|c| c.state == ContainerState::Running)
            .map(|c| c.config.name.clone())
            .collect()
    }

    /// Containers killed, as passed to `kill`.
    #[must_use]
    pub fn killed(&self) -> Vec<String> {
        self.state().killed.clone()
    }

    /// Containers removed, as passed to `remove`.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    /// Images committed, as `repository:tag`.
    #[must_use]
    pub fn commits(&self) -> Vec<String> {
        self.state().commits.clone()
    }

    /// Images pulled.
    #[must_use]
    pub fn pulls(&self) -> Vec<String> {
        self.state().pulls.clone()
    }

    /// Image tags built.
    #[must_use]
    pub fn builds(&self) -> Vec<String> {
        self.state().builds.clone()
    }

    /// Commands run through `exec`, with their target container.
    #[must_use]
    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.state().execs.clone()
    }

    /// The configuration a container was created with.
    #[must_use]
    pub fn config_of(&self, container: &str) -> Option<ContainerConfig> {
        self.state().find(container).map(|c| c.config.clone())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn endpoint(&self) -> String {
        "mock://".into()
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.has_image(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state();
        state.pulls.push(image.to_string());
        if state.failing_pulls.contains(image) {
            return Err(TestbedError::ImageAcquisition {
                image: image.to_string(),
                message: "pull access denied".into(),
            });
        }
        let _ = state.images.insert(image.to_string());
        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        let mut state = self.state();
        state.builds.push(request.tag.clone());
        let _ = state.images.insert(request.tag.clone());
        Ok(())
    }

    async fn commit(&self, container: &str, repository: &str, tag: &str) -> Result<()> {
        let mut state = self.state();
        if state.find(container).is_none() {
            return Err(missing(container));
        }
        let image = format!("{repository}:{tag}");
        state.commits.push(image.clone());
        let _ = state.images.insert(image);
        Ok(())
    }

    async fn create(&self, config: &ContainerConfig) -> Result<ContainerId> {
        let mut state = self.state();
        if !state.images.contains(&config.image) {
            return Err(TestbedError::NotFound {
                kind: "image",
                id: config.image.clone(),
            });
        }
        if state.containers.iter().any(|c| c.config.name == config.name) {
            return Err(TestbedError::Runtime {
                operation: "create",
                message: format!("Conflict. The container name {:?} is already in use", config.name),
            });
        }

        state.next_id += 1;
        let id = ContainerId::new(format!("mock-{:04}", state.next_id));
        let mut ports = HashMap::new();
        if let (Some(port), Some(host_port)) = (config.exposed_port, config.host_port) {
            let host = match host_port {
                HostPort::Fixed(p) => p,
                HostPort::Any => {
                    let p = FIRST_EPHEMERAL_PORT.saturating_add(state.next_port);
                    state.next_port += 1;
                    p
                }
            };
            let _ = ports.insert(port, host);
        }

        state.created.push(config.name.clone());
        state.containers.push(MockContainer {
            id: id.clone(),
            config: config.clone(),
            state: ContainerState::Created,
            ports,
        });
        Ok(id)
    }

    async fn start(&self, container: &str) -> Result<()> {
        let mut state = self.state();
        let entry = state.find_mut(container).ok_or_else(|| missing(container))?;
        entry.state = ContainerState::Running;
        Ok(())
    }

    async fn kill(&self, container: &str) -> Result<()> {
        let mut state = self.state();
        let entry = state.find_mut(container).ok_or_else(|| missing(container))?;
        if entry.state != ContainerState::Running {
            return Err(TestbedError::Runtime {
                operation: "kill",
                message: format!("container {container} is not running"),
            });
        }
        entry.state = ContainerState::Exited;
        state.killed.push(container.to_string());
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let mut state = self.state();
        let before = state.containers.len();
        state
            .containers
            .retain(|c| c.id.as_str() != container && c.config.name != container);
        if state.containers.len() != before {
            state.removed.push(container.to_string());
        }
        Ok(())
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput> {
        let mut state = self.state();
        let running = state
            .find(container)
            .ok_or_else(|| missing(container))?
            .state
            == ContainerState::Running;
        if !running {
            return Err(TestbedError::Runtime {
                operation: "exec",
                message: format!("container {container} is not running"),
            });
        }
        state.execs.push((container.to_string(), command.to_vec()));
        Ok(state.exec_outputs.pop_front().unwrap_or_default())
    }

    fn logs(&self, container: &str) -> LogStream {
        let mut state = self.state();
        if state.find(container).is_none() {
            let error = missing(container);
            return stream::once(async move { Err(error) }).boxed();
        }
        let script = state
            .log_scripts
            .pop_front()
            .unwrap_or_else(|| state.default_logs.clone());
        let lines = stream::iter(
            script
                .lines
                .into_iter()
                .map(|line| Ok(format!("{line}\n")))
                .collect::<Vec<_>>(),
        );
        if script.then_hang {
            lines.chain(stream::pending()).boxed()
        } else {
            lines.boxed()
        }
    }

    async fn inspect(&self, container: &str) -> Result<Option<ContainerInfo>> {
        Ok(self.state().find(container).map(info))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .state()
            .containers
            .iter()
            .filter(|c| c.config.name.starts_with(prefix))
            .map(info)
            .collect())
    }
}
