//! Container engine abstraction.

pub mod docker;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use testbed_common::error::Result;
use testbed_common::types::{ContainerId, ContainerState};

use crate::exec::ExecOutput;

/// Followed log output of a container, as lossily decoded chunks.
///
/// Chunks carry no line structure; feed them through
/// [`LineBuffer`](crate::logs::LineBuffer).
pub type LogStream = BoxStream<'static, Result<String>>;

/// Host side of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPort {
    /// Let the engine pick a free port.
    Any,
    /// Publish on this exact port.
    Fixed(u16),
}

/// Configuration for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command to run; empty keeps the image default.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Legacy links, as `container:alias`.
    pub links: Vec<String>,
    /// TCP port exposed by the container.
    pub exposed_port: Option<u16>,
    /// How `exposed_port` is published on the host, if at all.
    pub host_port: Option<HostPort>,
}

/// Information about an existing container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Engine identifier.
    pub id: ContainerId,
    /// Container name, without the leading slash.
    pub name: String,
    /// Current state.
    pub state: ContainerState,
    /// Image the container runs.
    pub image: String,
    /// Published ports, container port to host port.
    pub ports: HashMap<u16, u16>,
}

impl ContainerInfo {
    /// Returns whether the container is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Returns the host port a container port is published on.
    #[must_use]
    pub fn published_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }
}

/// An image build request with a packed build context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Tag given to the built image.
    pub tag: String,
    /// Dockerfile path, relative to the context root.
    pub dockerfile: String,
    /// Build arguments.
    pub build_args: HashMap<String, String>,
    /// Gzip-compressed tar archive of the build context.
    pub context: Vec<u8>,
}

/// Operations the testbed needs from a container engine.
///
/// Containers may be addressed by ID or by name. All identifiers and log
/// contents are passed through unmodified.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short label for the engine endpoint, used in logs.
    fn endpoint(&self) -> String;

    /// Verifies that the engine is reachable.
    ///
    /// # Errors
    ///
    /// Returns a connectivity error if the engine does not respond.
    async fn ping(&self) -> Result<()>;

    /// Returns whether an image is present locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pulls an image from its registry.
    ///
    /// # Errors
    ///
    /// Returns an image acquisition error if the pull fails.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Builds an image from a packed context.
    ///
    /// # Errors
    ///
    /// Returns an image acquisition error if the build fails.
    async fn build_image(&self, request: &BuildRequest) -> Result<()>;

    /// Snapshots a container's filesystem as `repository:tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    async fn commit(&self, container: &str, repository: &str, tag: &str) -> Result<()>;

    /// Creates a container without starting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created, including when
    /// the name is already taken.
    async fn create(&self, config: &ContainerConfig) -> Result<ContainerId>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    async fn start(&self, container: &str) -> Result<()>;

    /// Kills a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or not running.
    async fn kill(&self, container: &str) -> Result<()>;

    /// Force-removes a container. A missing container is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses the removal.
    async fn remove(&self, container: &str) -> Result<()>;

    /// Runs a command inside a running container and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the exec cannot be created or attached.
    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput>;

    /// Follows the combined stdout and stderr of a container from its start.
    fn logs(&self, container: &str) -> LogStream;

    /// Inspects a container, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    async fn inspect(&self, container: &str) -> Result<Option<ContainerInfo>>;

    /// Lists all containers whose name starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    async fn list(&self, prefix: &str) -> Result<Vec<ContainerInfo>>;
}
