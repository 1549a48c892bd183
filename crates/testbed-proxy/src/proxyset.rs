//! A directory of generated proxies.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use testbed_common::error::{Result, TestbedError};
use testbed_runtime::{ContainerConfig, ContainerRuntime};

use crate::lock::ColdStartLock;
use crate::script::{ProxyBinary, ScriptSettings};

/// Identity of the long-lived container shared-mode proxies exec into.
///
/// Several proxy sets may carry the same identity; none of them owns the
/// container exclusively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedContainer {
    /// Container name.
    pub name: String,
    /// Lock file serialising cold starts.
    pub lock_path: PathBuf,
}

impl SharedContainer {
    /// Directory the scripts fall back to locking when `flock` is missing.
    #[must_use]
    pub fn lock_dir(&self) -> PathBuf {
        let mut dir = self.lock_path.clone().into_os_string();
        dir.push(".d");
        PathBuf::from(dir)
    }

    /// Removes the lock file and any stale fallback lock directory.
    fn remove_lock_files(&self) {
        let lock_dir = self.lock_dir();
        for (path, removed) in [
            (&self.lock_path, std::fs::remove_file(&self.lock_path)),
            (&lock_dir, std::fs::remove_dir(&lock_dir)),
        ] {
            if let Err(e) = removed {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove cold-start lock");
                }
            }
        }
    }
}

/// Generated proxy scripts in a directory unique to this set.
///
/// The directory is removed by [`tear_down`](Self::tear_down), or on drop if
/// tear-down never ran.
#[derive(Debug)]
pub struct ProxySet {
    directory: Option<TempDir>,
    path: PathBuf,
    binaries: Vec<ProxyBinary>,
    settings: ScriptSettings,
}

impl ProxySet {
    /// Writes one script per binary into `directory`.
    pub(crate) fn create(
        directory: TempDir,
        binaries: Vec<ProxyBinary>,
        settings: ScriptSettings,
    ) -> Result<Self> {
        let set = Self {
            path: directory.path().to_path_buf(),
            directory: Some(directory),
            binaries,
            settings,
        };
        set.write_scripts()?;
        tracing::debug!(
            path = %set.path.display(),
            binaries = set.binaries.len(),
            shared = ?set.settings.shared.as_ref().map(|s| &s.name),
            "created proxy binaries"
        );
        Ok(set)
    }

    fn write_scripts(&self) -> Result<()> {
        for binary in &self.binaries {
            let path = self.path.join(binary.name());
            std::fs::write(&path, self.settings.render(binary))
                .map_err(|e| TestbedError::io(&path, e))?;
            make_executable(&path)?;
        }
        Ok(())
    }

    /// Directory holding the scripts.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the proxied binaries.
    pub fn binaries(&self) -> impl Iterator<Item = &str> {
        self.binaries.iter().map(ProxyBinary::name)
    }

    /// Path of the script for `binary`, if this set proxies it.
    #[must_use]
    pub fn binary_path(&self, binary: &str) -> Option<PathBuf> {
        self.binaries
            .iter()
            .any(|b| b.name() == binary)
            .then(|| self.path.join(binary))
    }

    /// Shared container identity, in shared mode.
    #[must_use]
    pub const fn shared(&self) -> Option<&SharedContainer> {
        self.settings.shared.as_ref()
    }

    /// Client image the scripts run.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.settings.image
    }

    /// Rewrites this set's scripts to use `other`'s shared container.
    ///
    /// The lock files of the identity this set gave up are removed; a
    /// container already started under it is left to its owner.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if `other` is not in shared mode, runs
    /// a different image, or this set was torn down; an I/O error if the
    /// scripts cannot be rewritten.
    pub fn share_with(&mut self, other: &Self) -> Result<()> {
        let Some(shared) = other.shared() else {
            return Err(TestbedError::InvalidState {
                message: "cannot share a container with a one-shot proxy set".into(),
            });
        };
        if other.image() != self.image() {
            return Err(TestbedError::InvalidState {
                message: format!(
                    "proxy sets run different images ({} and {})",
                    self.image(),
                    other.image()
                ),
            });
        }
        if self.directory.is_none() {
            return Err(TestbedError::InvalidState {
                message: "proxy set has been torn down".into(),
            });
        }
        if let Some(previous) = self.settings.shared.replace(shared.clone()) {
            if previous != *shared {
                previous.remove_lock_files();
            }
        }
        self.write_scripts()
    }

    /// Starts the shared container now instead of on first use, under the
    /// same lock the scripts take. Does nothing for one-shot sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or the container
    /// cannot be started and is not running afterwards.
    pub async fn warm(&self, runtime: &dyn ContainerRuntime) -> Result<()> {
        let Some(shared) = self.shared() else {
            return Ok(());
        };
        if is_running(runtime, &shared.name).await? {
            return Ok(());
        }

        let lock_path = shared.lock_path.clone();
        let wait = Duration::from_secs(self.settings.lock_wait_secs);
        let lock = tokio::task::spawn_blocking(move || ColdStartLock::acquire_timeout(&lock_path, wait))
            .await
            .map_err(|e| TestbedError::io(&shared.lock_path, std::io::Error::other(e)))??;
        if lock.is_none() {
            tracing::warn!(lock = %shared.lock_path.display(), "cold-start lock wait expired, proceeding");
        }

        if is_running(runtime, &shared.name).await? {
            return Ok(());
        }
        tracing::info!(container = %shared.name, image = self.image(), "starting shared proxy container");
        runtime.remove(&shared.name).await?;
        let config = ContainerConfig {
            name: shared.name.clone(),
            image: self.settings.image.clone(),
            command: self.settings.keepalive.clone(),
            env: self.settings.target.env(),
            links: self.settings.target.link().into_iter().collect(),
            ..ContainerConfig::default()
        };
        let started = match runtime.create(&config).await {
            Ok(id) => runtime.start(id.as_str()).await,
            Err(e) => Err(e),
        };
        drop(lock);

        // Losing a race to another starter is fine once the container runs.
        if let Err(e) = started {
            if !is_running(runtime, &shared.name).await? {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Removes the scripts and, in shared mode, the shared container and its
    /// cold-start lock files.
    ///
    /// Never fails and may be called any number of times; problems are
    /// logged.
    pub async fn tear_down(&mut self, runtime: &dyn ContainerRuntime) {
        if let Some(directory) = self.directory.take() {
            if let Err(e) = directory.close() {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove proxy directory");
                }
            }
        }
        if let Some(shared) = &self.settings.shared {
            if let Err(e) = runtime.remove(&shared.name).await {
                tracing::warn!(container = %shared.name, error = %e, "failed to remove shared proxy container");
            }
            shared.remove_lock_files();
        }
    }
}

async fn is_running(runtime: &dyn ContainerRuntime, name: &str) -> Result<bool> {
    Ok(runtime
        .inspect(name)
        .await?
        .is_some_and(|info| info.is_running()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o770))
        .map_err(|e| TestbedError::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
