//! Domain primitive types used across the testbed workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TestbedError};

/// Engine-assigned identifier of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container has been created but not yet started.
    Created,
    /// Container is actively running.
    Running,
    /// Container has exited or been killed.
    Exited,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// A user of the catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login name.
    pub username: String,
    /// Zone the user belongs to.
    pub zone: String,
    /// Password, if known.
    pub password: Option<String>,
    /// Whether the user has administrative rights.
    pub admin: bool,
}

impl User {
    /// Creates a user with a password.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        zone: impl Into<String>,
        password: impl Into<String>,
        admin: bool,
    ) -> Self {
        Self {
            username: username.into(),
            zone: zone.into(),
            password: Some(password.into()),
            admin,
        }
    }

    /// Returns the password, or an empty string when none is known.
    #[must_use]
    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

/// Major generation of the catalog service.
///
/// Readiness markers and the connection settings format differ per generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Generation {
    /// 3.x servers: flat `key value` settings, supervisor-style startup logs.
    Legacy,
    /// 4.x servers: JSON settings, explicit started/failed log lines.
    Structured,
}

/// A supported catalog service version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogVersion {
    /// 3.3.1
    V3_3_1,
    /// 4.1.8
    V4_1_8,
    /// 4.1.9
    V4_1_9,
    /// 4.1.10
    V4_1_10,
}

impl CatalogVersion {
    /// All supported versions, oldest first.
    pub const ALL: [Self; 4] = [Self::V3_3_1, Self::V4_1_8, Self::V4_1_9, Self::V4_1_10];

    /// Returns the dotted version string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V3_3_1 => "3.3.1",
            Self::V4_1_8 => "4.1.8",
            Self::V4_1_9 => "4.1.9",
            Self::V4_1_10 => "4.1.10",
        }
    }

    /// Returns the service generation this version belongs to.
    #[must_use]
    pub const fn generation(self) -> Generation {
        match self {
            Self::V3_3_1 => Generation::Legacy,
            Self::V4_1_8 | Self::V4_1_9 | Self::V4_1_10 => Generation::Structured,
        }
    }

    /// Parses a dotted version string such as `4.1.8`.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is not supported.
    pub fn parse(version: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == version.trim())
            .ok_or_else(|| TestbedError::Config {
                message: format!("unsupported catalog server version: {version}"),
            })
    }
}

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of a server to start.
///
/// Immutable once constructed; the user list is never empty and the port is
/// never zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServerSpec")]
pub struct ServerSpec {
    image: String,
    version: CatalogVersion,
    users: Vec<User>,
    port: u16,
}

/// Unchecked wire form of [`ServerSpec`].
#[derive(Deserialize)]
struct RawServerSpec {
    image: String,
    version: CatalogVersion,
    users: Vec<User>,
    port: u16,
}

impl TryFrom<RawServerSpec> for ServerSpec {
    type Error = TestbedError;

    fn try_from(raw: RawServerSpec) -> Result<Self> {
        Self::new(raw.image, raw.version, raw.users, raw.port)
    }
}

impl ServerSpec {
    /// Creates a server spec.
    ///
    /// # Errors
    ///
    /// Returns an error if `users` is empty or `port` is zero.
    pub fn new(
        image: impl Into<String>,
        version: CatalogVersion,
        users: Vec<User>,
        port: u16,
    ) -> Result<Self> {
        if users.is_empty() {
            return Err(TestbedError::Config {
                message: "a server needs at least one user".into(),
            });
        }
        if port == 0 {
            return Err(TestbedError::Config {
                message: "server port must be positive".into(),
            });
        }
        Ok(Self {
            image: image.into(),
            version,
            users,
            port,
        })
    }

    /// Image reference the server runs.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Service version.
    #[must_use]
    pub const fn version(&self) -> CatalogVersion {
        self.version
    }

    /// Configured users; the first one is the default identity.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Port the service listens on inside the container.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

/// A containerised server started by the lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningServer {
    /// Engine handle of the container.
    pub id: ContainerId,
    /// Assigned container name.
    pub name: String,
    /// Host to reach the server on from linked containers.
    pub host: String,
    /// Port the server listens on.
    pub port: u16,
    /// Host port the server port is published on, if any.
    pub published_port: Option<u16>,
    /// Service version.
    pub version: CatalogVersion,
    /// Configured users; never empty.
    pub users: Vec<User>,
    /// When the server became ready.
    pub started_at: DateTime<Utc>,
}

/// A server that is already running outside the testbed's control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalServer {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Users; the first is the default identity.
    pub users: Vec<User>,
}

/// Connection coordinates shared by containerised and external servers.
pub trait ServerEndpoint {
    /// Host clients connect to.
    fn host(&self) -> &str;
    /// Port clients connect to.
    fn port(&self) -> u16;
    /// Users known to the server; the first is the default identity.
    fn users(&self) -> &[User];

    /// Returns the default (first) user.
    ///
    /// # Errors
    ///
    /// Returns an error if the server has no users.
    fn default_user(&self) -> Result<&User> {
        self.users().first().ok_or_else(|| TestbedError::Config {
            message: "server has no users".into(),
        })
    }
}

impl ServerEndpoint for RunningServer {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn users(&self) -> &[User] {
        &self.users
    }
}

impl ServerEndpoint for ExternalServer {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn users(&self) -> &[User] {
        &self.users
    }
}
