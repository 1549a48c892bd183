//! Server lifecycle controller.
//!
//! Each start attempt runs `created -> started -> ready | failed`. A failed
//! attempt kills its container and starts over with a fresh one, up to the
//! policy's attempt limit. The first ready server is snapshotted as a cache
//! image so later starts skip first-boot initialisation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use testbed_common::config::{PortBinding, StartConfig};
use testbed_common::constants::SERVER_CONTAINER_HINT;
use testbed_common::error::{Result, TestbedError};
use testbed_common::naming::unique_name;
use testbed_common::types::{ContainerId, RunningServer, ServerSpec};
use testbed_image::{ImageRef, ImageResolver, ResolvedImage};
use testbed_runtime::{ContainerConfig, ContainerGuard, ContainerRuntime, HostPort};

use crate::readiness::{Readiness, wait_until_ready};
use crate::settings::ConnectionSettings;

/// Limits applied to [`ServerController::start_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPolicy {
    /// Attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Per-attempt readiness limit; `None` waits forever.
    pub readiness_timeout: Option<Duration>,
    /// Pause between liveness probes.
    pub probe_interval: Duration,
    /// How the server port is exposed.
    pub port_binding: PortBinding,
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self::from(&StartConfig::default())
    }
}

impl From<&StartConfig> for StartPolicy {
    fn from(config: &StartConfig) -> Self {
        Self {
            max_attempts: config.max_start_attempts,
            readiness_timeout: config.readiness_timeout(),
            probe_interval: config.probe_interval(),
            port_binding: config.port_binding,
        }
    }
}

impl StartPolicy {
    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

/// Starts and stops containerised catalog servers.
#[derive(Clone)]
pub struct ServerController {
    runtime: Arc<dyn ContainerRuntime>,
    resolver: ImageResolver,
    policy: StartPolicy,
}

impl std::fmt::Debug for ServerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerController")
            .field("endpoint", &self.runtime.endpoint())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ServerController {
    /// Creates a controller over a shared runtime.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: StartPolicy) -> Self {
        Self {
            resolver: ImageResolver::new(Arc::clone(&runtime)),
            runtime,
            policy,
        }
    }

    /// The runtime this controller drives.
    #[must_use]
    pub const fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// The active start policy.
    #[must_use]
    pub const fn policy(&self) -> &StartPolicy {
        &self.policy
    }

    /// Starts a server and returns once it is ready for queries.
    ///
    /// Uses the cache image of `spec`'s image when one exists. After the
    /// first successful start from the base image, the container is
    /// committed as that cache image; a failed commit is ignored.
    ///
    /// # Errors
    ///
    /// Returns an image acquisition error if the base image cannot be
    /// pulled, an engine error if a container cannot be created or started,
    /// or [`TestbedError::StartAttemptsExhausted`] once every allowed
    /// attempt failed its readiness check.
    pub async fn start_server(&self, spec: &ServerSpec) -> Result<RunningServer> {
        let base = ImageRef::parse(spec.image())?;
        let image = self.resolver.resolve(&base).await?;
        tracing::info!(image = %image.reference, cached = image.from_cache, "starting server");

        let mut attempt: u32 = 1;
        loop {
            if let Some(guard) = self.attempt(spec, &image, attempt).await? {
                return self.hand_over(spec, &base, &image, guard).await;
            }
            if !self.policy.allows(attempt.saturating_add(1)) {
                return Err(TestbedError::StartAttemptsExhausted {
                    image: image.reference.to_string(),
                    attempts: attempt,
                });
            }
            tracing::warn!(attempt, "server did not start correctly - restarting");
            attempt = attempt.saturating_add(1);
        }
    }

    /// One create/start/wait cycle. Returns the guard of a ready container,
    /// or `None` after killing a container that failed.
    async fn attempt(
        &self,
        spec: &ServerSpec,
        image: &ResolvedImage,
        attempt: u32,
    ) -> Result<Option<ContainerGuard>> {
        let name = unique_name(SERVER_CONTAINER_HINT);
        let config = ContainerConfig {
            name: name.clone(),
            image: image.reference.to_string(),
            exposed_port: Some(spec.port()),
            host_port: self.host_port()?,
            ..ContainerConfig::default()
        };

        tracing::info!(container = %name, attempt, "creating server container");
        let id = self.runtime.create(&config).await?;
        let guard = ContainerGuard::new(Arc::clone(&self.runtime), id);
        self.runtime.start(guard.id().as_str()).await?;

        let wait = wait_until_ready(
            self.runtime.as_ref(),
            guard.id().as_str(),
            spec.version().generation(),
            self.policy.probe_interval,
        );
        let readiness = match self.policy.readiness_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or_else(|_| {
                tracing::warn!(container = %name, ?limit, "server not ready in time");
                Ok(Readiness::Failed)
            }),
            None => wait.await,
        };

        match readiness {
            Ok(Readiness::Ready) => Ok(Some(guard)),
            Ok(Readiness::Failed) => {
                self.discard(guard).await;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "readiness check failed");
                self.discard(guard).await;
                Ok(None)
            }
        }
    }

    async fn discard(&self, guard: ContainerGuard) {
        let id = guard.disarm();
        if let Err(e) = self.runtime.kill(id.as_str()).await {
            tracing::debug!(container = %id, error = %e, "kill of failed server container");
        }
    }

    /// Commits the cache image, reads back the published port, and releases
    /// the container to the caller.
    async fn hand_over(
        &self,
        spec: &ServerSpec,
        base: &ImageRef,
        image: &ResolvedImage,
        guard: ContainerGuard,
    ) -> Result<RunningServer> {
        let id = guard.id().clone();
        if !image.from_cache {
            if let Err(e) = self.resolver.cache_container(id.as_str(), base).await {
                tracing::debug!(container = %id, error = %e, "cache image not committed");
            }
        }

        let info = self
            .runtime
            .inspect(id.as_str())
            .await?
            .ok_or_else(|| TestbedError::NotFound {
                kind: "container",
                id: id.to_string(),
            })?;
        let published_port = info.published_port(spec.port());
        let id: ContainerId = guard.disarm();

        tracing::info!(container = %info.name, ?published_port, "server ready");
        Ok(RunningServer {
            id,
            host: info.name.clone(),
            name: info.name,
            port: spec.port(),
            published_port,
            version: spec.version(),
            users: spec.users().to_vec(),
            started_at: Utc::now(),
        })
    }

    fn host_port(&self) -> Result<Option<HostPort>> {
        Ok(match self.policy.port_binding {
            PortBinding::Linked => None,
            PortBinding::Ephemeral => Some(HostPort::Any),
            PortBinding::OpenHostPort => Some(HostPort::Fixed(open_host_port()?)),
        })
    }

    /// Kills a server. Never fails; problems are logged.
    pub async fn stop_server(&self, server: &RunningServer) {
        tracing::info!(container = %server.name, "stopping server");
        if let Err(e) = self.runtime.kill(server.id.as_str()).await {
            tracing::warn!(container = %server.name, error = %e, "failed to stop server");
        }
    }

    /// Writes client connection settings for `server` to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TestbedError::SettingsExist`] if `path` already exists, or
    /// an I/O error if writing fails.
    pub fn write_connection_settings(&self, path: &Path, server: &RunningServer) -> Result<()> {
        ConnectionSettings::for_server(server)?.write(path, server.version.generation())
    }
}

/// Finds a currently free TCP port on the host.
fn open_host_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| TestbedError::io("127.0.0.1:0", e))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| TestbedError::io("127.0.0.1:0", e))
}
