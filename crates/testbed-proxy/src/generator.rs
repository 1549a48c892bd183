//! Proxy binary generation.

use std::path::PathBuf;

use testbed_common::config::{ProxyConfig, TestbedConfig};
use testbed_common::error::{Result, TestbedError};
use testbed_common::naming::unique_name;

use crate::proxyset::{ProxySet, SharedContainer};
use crate::script::{ProxyBinary, ScriptSettings};
use crate::suites::Suite;
use crate::target::ProxyTarget;

/// Name hint of shared proxy containers.
const SHARED_CONTAINER_HINT: &str = "testbed-proxy";

/// Writes proxy sets.
#[derive(Debug, Clone)]
pub struct ProxyGenerator {
    docker: PathBuf,
    config: ProxyConfig,
    lock_dir: PathBuf,
}

impl ProxyGenerator {
    /// Creates a generator from the testbed configuration, locating the
    /// engine CLI on `PATH` unless one is configured.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if no engine CLI can be located.
    pub fn new(config: &TestbedConfig) -> Result<Self> {
        let docker = match &config.proxy.docker_binary {
            Some(path) => path.clone(),
            None => which::which("docker").map_err(|_| TestbedError::NotFound {
                kind: "docker CLI",
                id: "docker (install the Docker CLI or set TESTBED_DOCKER_BINARY)".into(),
            })?,
        };
        Ok(Self::with_docker(docker, config.proxy.clone(), config.lock_dir()))
    }

    /// Creates a generator with an explicit engine CLI path.
    #[must_use]
    pub const fn with_docker(docker: PathBuf, config: ProxyConfig, lock_dir: PathBuf) -> Self {
        Self {
            docker,
            config,
            lock_dir,
        }
    }

    /// Writes a script per binary into a fresh directory.
    ///
    /// In shared mode the set gets its own shared container identity;
    /// binaries needing host input still run one-shot.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or a script cannot be written.
    pub fn create_proxy_binaries(
        &self,
        target: &ProxyTarget,
        image: &str,
        binaries: Vec<ProxyBinary>,
    ) -> Result<ProxySet> {
        self.create_in("proxies-", target, image, binaries)
    }

    /// Writes proxies for a whole suite.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or a script cannot be written.
    pub fn create_suite(&self, target: &ProxyTarget, image: &str, suite: Suite) -> Result<ProxySet> {
        self.create_in(suite.directory_prefix(), target, image, suite.binaries())
    }

    fn create_in(
        &self,
        prefix: &str,
        target: &ProxyTarget,
        image: &str,
        binaries: Vec<ProxyBinary>,
    ) -> Result<ProxySet> {
        let directory = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| TestbedError::io(std::env::temp_dir(), e))?;

        let shared = if self.config.shared_container {
            std::fs::create_dir_all(&self.lock_dir)
                .map_err(|e| TestbedError::io(&self.lock_dir, e))?;
            let name = unique_name(SHARED_CONTAINER_HINT);
            Some(SharedContainer {
                lock_path: self.lock_dir.join(format!("{name}.lock")),
                name,
            })
        } else {
            None
        };

        ProxySet::create(
            directory,
            binaries,
            ScriptSettings {
                docker: self.docker.clone(),
                image: image.to_string(),
                target: target.clone(),
                shared,
                lock_wait_secs: self.config.lock_wait_secs,
                keepalive: self.config.keepalive_command.clone(),
            },
        )
    }
}
