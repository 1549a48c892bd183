//! Client connection settings files.
//!
//! Legacy clients read `.irodsEnv`, one `key value` pair per line. Structured
//! clients read `irods_environment.json`. Passwords never go into either
//! file; clients receive them through their environment.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use testbed_common::error::{Result, TestbedError};
use testbed_common::types::{Generation, RunningServer, ServerEndpoint};

/// File name legacy clients look for.
pub const LEGACY_FILE_NAME: &str = ".irodsEnv";
/// File name structured clients look for.
pub const STRUCTURED_FILE_NAME: &str = "irods_environment.json";

const LEGACY_USERNAME: &str = "irodsUserName";
const LEGACY_HOST: &str = "irodsHost";
const LEGACY_PORT: &str = "irodsPort";
const LEGACY_ZONE: &str = "irodsZone";

/// Conventional settings file name for a generation.
#[must_use]
pub const fn file_name(generation: Generation) -> &'static str {
    match generation {
        Generation::Legacy => LEGACY_FILE_NAME,
        Generation::Structured => STRUCTURED_FILE_NAME,
    }
}

#[derive(Serialize, Deserialize)]
struct StructuredSettings {
    irods_user_name: String,
    irods_host: String,
    irods_port: u16,
    irods_zone_name: String,
}

/// Where and as whom a client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Login name.
    pub username: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Zone of the user.
    pub zone: String,
}

impl ConnectionSettings {
    /// Settings for the default user of a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server has no users.
    pub fn for_server(server: &impl ServerEndpoint) -> Result<Self> {
        let user = server.default_user()?;
        Ok(Self {
            username: user.username.clone(),
            host: server.host().to_string(),
            port: server.port(),
            zone: user.zone.clone(),
        })
    }

    /// Serializes the settings in the format of `generation`.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render(&self, generation: Generation) -> Result<String> {
        match generation {
            Generation::Legacy => Ok(format!(
                "{LEGACY_USERNAME} {}\n{LEGACY_HOST} {}\n{LEGACY_PORT} {}\n{LEGACY_ZONE} {}\n",
                self.username, self.host, self.port, self.zone
            )),
            Generation::Structured => Ok(serde_json::to_string(&StructuredSettings {
                irods_user_name: self.username.clone(),
                irods_host: self.host.clone(),
                irods_port: self.port,
                irods_zone_name: self.zone.clone(),
            })?),
        }
    }

    /// Parses settings written in the format of `generation`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing or malformed.
    pub fn parse(contents: &str, generation: Generation) -> Result<Self> {
        match generation {
            Generation::Legacy => parse_legacy(contents),
            Generation::Structured => {
                let s: StructuredSettings = serde_json::from_str(contents)?;
                Ok(Self {
                    username: s.irods_user_name,
                    host: s.irods_host,
                    port: s.irods_port,
                    zone: s.irods_zone_name,
                })
            }
        }
    }

    /// Writes the settings to `path`, which must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`TestbedError::SettingsExist`] if `path` exists, leaving it
    /// untouched, or an I/O error if writing fails.
    pub fn write(&self, path: &Path, generation: Generation) -> Result<()> {
        let contents = self.render(generation)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    TestbedError::SettingsExist {
                        path: path.to_path_buf(),
                    }
                } else {
                    TestbedError::io(path, e)
                }
            })?;
        tracing::debug!(path = %path.display(), "writing connection settings");
        file.write_all(contents.as_bytes())
            .map_err(|e| TestbedError::io(path, e))
    }

    /// Reads settings written by [`write`](Self::write).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path, generation: Generation) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TestbedError::io(path, e))?;
        Self::parse(&contents, generation)
    }
}

fn parse_legacy(contents: &str) -> Result<ConnectionSettings> {
    let mut username = None;
    let mut host = None;
    let mut port = None;
    let mut zone = None;
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim().to_string();
        match key {
            LEGACY_USERNAME => username = Some(value),
            LEGACY_HOST => host = Some(value),
            LEGACY_PORT => port = Some(value),
            LEGACY_ZONE => zone = Some(value),
            _ => {}
        }
    }

    let missing = |key: &str| TestbedError::Config {
        message: format!("connection settings lack {key}"),
    };
    let port = port.ok_or_else(|| missing(LEGACY_PORT))?;
    Ok(ConnectionSettings {
        username: username.ok_or_else(|| missing(LEGACY_USERNAME))?,
        host: host.ok_or_else(|| missing(LEGACY_HOST))?,
        port: port.parse().map_err(|_| TestbedError::Config {
            message: format!("{LEGACY_PORT} is not a port: {port}"),
        })?,
        zone: zone.ok_or_else(|| missing(LEGACY_ZONE))?,
    })
}

/// Writes the settings of `server` into a fresh temporary directory under
/// the file name its clients expect, for mounting into client containers.
///
/// The directory is removed when the returned handle is dropped.
///
/// # Errors
///
/// Returns an error if the directory or the file cannot be created.
pub fn create_connection_settings_volume(server: &RunningServer) -> Result<TempDir> {
    let directory = tempfile::Builder::new()
        .prefix("irods-config-")
        .tempdir()
        .map_err(|e| TestbedError::io(std::env::temp_dir(), e))?;
    tracing::info!(path = %directory.path().display(), "created directory for connection settings");

    let generation = server.version.generation();
    ConnectionSettings::for_server(server)?
        .write(&directory.path().join(file_name(generation)), generation)?;
    Ok(directory)
}
