//! One-call setup of a server plus client proxies.

use std::path::Path;
use std::sync::Arc;

use testbed_common::config::TestbedConfig;
use testbed_common::error::{Result, TestbedError};
use testbed_common::types::{ExternalServer, RunningServer, ServerSpec};
use testbed_image::{ImageResolver, ImageSource};
use testbed_proxy::{ProxyGenerator, ProxySet, ProxyTarget, Suite};
use testbed_runtime::{ContainerRuntime, DockerRuntime};
use testbed_server::{ServerController, StartPolicy, presets};

use crate::helper::SetupHelper;
use crate::presets::ClientSetup;

/// Lifecycle state of a [`TestBed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    /// Not set up yet.
    Init,
    /// Set up; resources are live.
    Running,
    /// Torn down; cannot be set up again.
    Stopped,
}

/// Server a testbed points its clients at.
#[derive(Debug, Clone)]
enum ServerSource {
    Start(ServerSpec),
    External(ExternalServer),
}

/// Builder for a [`TestBed`].
pub struct TestBedBuilder {
    client: Option<ImageSource>,
    server: Option<ServerSource>,
    setup: ClientSetup,
    config: Option<TestbedConfig>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    generator: Option<ProxyGenerator>,
}

impl TestBedBuilder {
    fn new() -> Self {
        Self {
            client: None,
            server: None,
            setup: ClientSetup::DEFAULT,
            config: None,
            runtime: None,
            generator: None,
        }
    }

    /// Uses a published client image and starts the server version it
    /// pairs with, unless a server is chosen explicitly.
    #[must_use]
    pub const fn client_setup(mut self, setup: ClientSetup) -> Self {
        self.setup = setup;
        self
    }

    /// Uses a custom client image, pulled or built during setup.
    #[must_use]
    pub fn client_image(mut self, source: ImageSource) -> Self {
        self.client = Some(source);
        self
    }

    /// Starts a server from `spec` instead of the preset.
    #[must_use]
    pub fn server_spec(mut self, spec: ServerSpec) -> Self {
        self.server = Some(ServerSource::Start(spec));
        self
    }

    /// Connects to an already running server instead of starting one.
    #[must_use]
    pub fn external_server(mut self, server: ExternalServer) -> Self {
        self.server = Some(ServerSource::External(server));
        self
    }

    /// Sets the configuration; defaults to [`TestbedConfig::from_env`].
    #[must_use]
    pub fn config(mut self, config: TestbedConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `runtime` instead of connecting to the local engine.
    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Uses `generator` instead of locating the engine CLI on `PATH`.
    #[must_use]
    pub fn proxy_generator(mut self, generator: ProxyGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Builds the testbed without touching the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment configuration is invalid.
    pub fn build(self) -> Result<TestBed> {
        let config = match self.config {
            Some(config) => config,
            None => TestbedConfig::from_env()?,
        };
        let client = match self.client {
            Some(source) => source,
            None => self.setup.image_source()?,
        };
        let server = match self.server {
            Some(server) => server,
            None => ServerSource::Start(presets::server_spec(self.setup.irods_version())?),
        };
        Ok(TestBed {
            state: SetupState::Init,
            client,
            server,
            config,
            runtime: self.runtime,
            generator: self.generator,
            controller: None,
            started: None,
            baton: None,
            icommands: None,
        })
    }
}

/// A server with baton and icommand proxies pointed at it.
///
/// Call [`setup`](Self::setup) once and [`tear_down`](Self::tear_down) when
/// finished. Dropping a running testbed kills what it started on a best
/// effort basis.
pub struct TestBed {
    state: SetupState,
    client: ImageSource,
    server: ServerSource,
    config: TestbedConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    generator: Option<ProxyGenerator>,
    controller: Option<ServerController>,
    started: Option<RunningServer>,
    baton: Option<ProxySet>,
    icommands: Option<ProxySet>,
}

impl TestBed {
    /// Starts building a testbed with the default client setup.
    #[must_use]
    pub fn builder() -> TestBedBuilder {
        TestBedBuilder::new()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SetupState {
        self.state
    }

    /// Directory of the baton proxies while running.
    #[must_use]
    pub fn baton_location(&self) -> Option<&Path> {
        self.baton.as_ref().map(ProxySet::path)
    }

    /// Directory of the icommand proxies while running.
    #[must_use]
    pub fn icommands_location(&self) -> Option<&Path> {
        self.icommands.as_ref().map(ProxySet::path)
    }

    /// Server started by this testbed, if any.
    #[must_use]
    pub const fn started_server(&self) -> Option<&RunningServer> {
        self.started.as_ref()
    }

    /// Helper running icommands against this testbed's server.
    #[must_use]
    pub fn helper(&self) -> Option<SetupHelper> {
        self.icommands_location()
            .map(|icommands| SetupHelper::new(icommands).with_staging_dir(self.config.staging_dir()))
    }

    /// Acquires the client image, starts the server unless an external one
    /// was given, and writes the proxies.
    ///
    /// On failure everything acquired so far is released and the testbed
    /// ends up stopped.
    ///
    /// # Errors
    ///
    /// Returns [`TestbedError::InvalidState`] unless the testbed is fresh,
    /// or the first error raised while setting up.
    pub async fn setup(&mut self) -> Result<()> {
        if self.state != SetupState::Init {
            return Err(TestbedError::InvalidState {
                message: "testbed has already been set up".into(),
            });
        }
        self.state = SetupState::Running;
        if let Err(e) = self.acquire().await {
            tracing::warn!(error = %e, "setup failed, releasing what was acquired");
            self.tear_down().await;
            return Err(e);
        }
        tracing::info!(
            baton = ?self.baton_location(),
            icommands = ?self.icommands_location(),
            "testbed ready"
        );
        Ok(())
    }

    async fn acquire(&mut self) -> Result<()> {
        let runtime = if let Some(runtime) = self.runtime.clone() {
            runtime
        } else {
            let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect().await?);
            self.runtime = Some(Arc::clone(&runtime));
            runtime
        };

        let image = ImageResolver::new(Arc::clone(&runtime))
            .ensure_available(&self.client)
            .await?
            .to_string();

        let target = match &self.server {
            ServerSource::Start(spec) => {
                let controller = ServerController::new(
                    Arc::clone(&runtime),
                    StartPolicy::from(&self.config.start),
                );
                let server = controller.start_server(spec).await?;
                let target = ProxyTarget::from_running(&server)?;
                self.controller = Some(controller);
                self.started = Some(server);
                target
            }
            ServerSource::External(server) => {
                tracing::debug!(host = %server.host, port = server.port, "using external server");
                ProxyTarget::from_external(server)?
            }
        };

        let generator = match &self.generator {
            Some(generator) => generator.clone(),
            None => ProxyGenerator::new(&self.config)?,
        };
        let baton = self
            .baton
            .insert(generator.create_suite(&target, &image, Suite::Baton)?);
        let mut icommands = generator.create_suite(&target, &image, Suite::ICommands)?;
        if baton.shared().is_some() {
            icommands.share_with(baton)?;
        }
        if self.config.proxy.prewarm {
            baton.warm(runtime.as_ref()).await?;
        }
        self.icommands = Some(icommands);
        Ok(())
    }

    /// Stops a server this testbed started and removes the proxies.
    ///
    /// Does nothing unless running. Never fails; problems are logged.
    pub async fn tear_down(&mut self) {
        if self.state != SetupState::Running {
            return;
        }
        self.state = SetupState::Stopped;

        if let (Some(controller), Some(server)) = (&self.controller, self.started.take()) {
            controller.stop_server(&server).await;
        } else {
            tracing::debug!("external or no server, nothing to stop");
        }

        let sets = [self.baton.take(), self.icommands.take()];
        match &self.runtime {
            Some(runtime) => {
                for mut set in sets.into_iter().flatten() {
                    set.tear_down(runtime.as_ref()).await;
                }
            }
            None => drop(sets),
        }
        tracing::info!("testbed torn down");
    }
}

impl std::fmt::Debug for TestBedBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestBedBuilder")
            .field("client", &self.client)
            .field("server", &self.server)
            .field("setup", &self.setup)
            .field("custom_runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for TestBed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestBed")
            .field("state", &self.state)
            .field("client", &self.client)
            .field("server", &self.server)
            .field("started", &self.started.as_ref().map(|s| &s.name))
            .field("baton", &self.baton_location())
            .field("icommands", &self.icommands_location())
            .finish_non_exhaustive()
    }
}

impl Drop for TestBed {
    fn drop(&mut self) {
        if self.state != SetupState::Running {
            return;
        }
        let Some(runtime) = self.runtime.clone() else {
            return;
        };
        let server = self.started.take().map(|server| server.name);
        let shared = self
            .baton
            .as_ref()
            .and_then(ProxySet::shared)
            .map(|shared| shared.name.clone());
        if server.is_none() && shared.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                drop(handle.spawn(async move {
                    for name in server.into_iter().chain(shared) {
                        if let Err(e) = runtime.remove(&name).await {
                            tracing::debug!(container = %name, error = %e, "cleanup of dropped testbed failed");
                        }
                    }
                }));
            }
            Err(_) => {
                tracing::warn!(?server, ?shared, "testbed dropped while running and no async runtime to clean up");
            }
        }
    }
}
