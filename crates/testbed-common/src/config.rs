//! Global configuration model for the testbed.
//!
//! Defaults suit an interactive test run. [`TestbedConfig::from_env`] lets CI
//! tighten the start policy without code changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TestbedError};

/// How the server port is made reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortBinding {
    /// Not published; clients reach the server through container links.
    #[default]
    Linked,
    /// Published on a host port chosen by the engine.
    Ephemeral,
    /// Published on a host port found free before the container is created.
    OpenHostPort,
}

/// Policy for the server start loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartConfig {
    /// Maximum create/start/wait attempts; `None` retries forever.
    pub max_start_attempts: Option<u32>,
    /// Per-attempt readiness timeout in seconds; `None` waits forever.
    pub readiness_timeout_secs: Option<u64>,
    /// Interval between liveness probes in milliseconds.
    pub probe_interval_ms: u64,
    /// How the server port is exposed.
    pub port_binding: PortBinding,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            max_start_attempts: Some(5),
            readiness_timeout_secs: Some(300),
            probe_interval_ms: 500,
            port_binding: PortBinding::Linked,
        }
    }
}

impl StartConfig {
    /// Readiness timeout as a [`Duration`].
    #[must_use]
    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }

    /// Probe interval as a [`Duration`].
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Settings for generated proxy binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Reuse one long-lived container for all invocations.
    pub shared_container: bool,
    /// Seconds a proxy waits on the cold-start lock before proceeding anyway.
    pub lock_wait_secs: u64,
    /// Container engine CLI baked into scripts; resolved on `PATH` when unset.
    pub docker_binary: Option<PathBuf>,
    /// Command that keeps the shared container alive.
    pub keepalive_command: Vec<String>,
    /// Start the shared container during setup instead of on first use.
    pub prewarm: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            shared_container: true,
            lock_wait_secs: 120,
            docker_binary: None,
            keepalive_command: vec!["sleep".into(), "infinity".into()],
            prewarm: false,
        }
    }
}

/// Root configuration for the testbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbedConfig {
    /// Server start policy.
    pub start: StartConfig,
    /// Proxy generation settings.
    pub proxy: ProxyConfig,
    /// Base directory for lock files.
    pub data_dir: PathBuf,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            start: StartConfig::default(),
            proxy: ProxyConfig::default(),
            data_dir: crate::constants::data_dir().clone(),
        }
    }
}

impl TestbedConfig {
    /// Loads the defaults overlaid with `TESTBED_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("TESTBED_MAX_START_ATTEMPTS") {
            self.start.max_start_attempts = parse_bound("TESTBED_MAX_START_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("TESTBED_READINESS_TIMEOUT_SECS") {
            self.start.readiness_timeout_secs = parse_bound("TESTBED_READINESS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("TESTBED_PROBE_INTERVAL_MS") {
            self.start.probe_interval_ms = parse_value("TESTBED_PROBE_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("TESTBED_SHARED_CONTAINER") {
            self.proxy.shared_container = parse_flag("TESTBED_SHARED_CONTAINER", &v)?;
        }
        if let Some(v) = lookup("TESTBED_LOCK_WAIT_SECS") {
            self.proxy.lock_wait_secs = parse_value("TESTBED_LOCK_WAIT_SECS", &v)?;
        }
        if let Some(v) = lookup("TESTBED_DOCKER_BINARY") {
            self.proxy.docker_binary = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TESTBED_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        Ok(self)
    }

    /// Directory holding cold-start lock files.
    #[must_use]
    pub fn lock_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    /// Directory local files are staged in before being uploaded through a
    /// proxy. Lives under the data directory so the engine can mount it.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| TestbedError::Config {
        message: format!("{key} has an invalid value: {value:?}"),
    })
}

/// `0` and `none` mean unbounded.
fn parse_bound<T: std::str::FromStr + PartialEq + Default>(
    key: &str,
    value: &str,
) -> Result<Option<T>> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let parsed: T = parse_value(key, value)?;
    Ok(if parsed == T::default() { None } else { Some(parsed) })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TestbedError::Config {
            message: format!("{key} must be a boolean, got {value:?}"),
        }),
    }
}
