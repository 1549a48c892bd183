//! Seeding a testbed with collections, data objects and users through the
//! icommand proxies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use testbed_common::constants::data_dir;
use testbed_common::error::{Result, TestbedError};
use testbed_common::naming::unique_name;
use testbed_common::types::User;
use tokio::process::Command;

/// Error code the catalog reports for a duplicate user.
const DUPLICATE_ITEM: &str = "CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME";

/// A storage resource created on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Resource name.
    pub name: String,
    /// Host the resource lives on.
    pub host: String,
    /// Vault path on that host.
    pub location: String,
}

/// Runs icommands from a proxy directory.
#[derive(Debug, Clone)]
pub struct SetupHelper {
    icommands: PathBuf,
    staging: PathBuf,
}

impl SetupHelper {
    /// Creates a helper for the icommands in `icommands`, staging uploads
    /// under the default data directory.
    #[must_use]
    pub fn new(icommands: impl Into<PathBuf>) -> Self {
        Self {
            icommands: icommands.into(),
            staging: data_dir().join("staging"),
        }
    }

    /// Stages uploads under `staging` instead.
    ///
    /// The directory must be mountable by the container engine; the system
    /// temp dir is not on every host.
    #[must_use]
    pub fn with_staging_dir(mut self, staging: impl Into<PathBuf>) -> Self {
        self.staging = staging.into();
        self
    }

    /// Directory uploads are staged in.
    #[must_use]
    pub fn staging_location(&self) -> &Path {
        &self.staging
    }

    /// Directory the icommands are run from.
    #[must_use]
    pub fn icommands_location(&self) -> &Path {
        &self.icommands
    }

    /// Runs an icommand, returning its stdout without trailing whitespace.
    ///
    /// The first argument names the binary in the icommands directory.
    ///
    /// # Errors
    ///
    /// Returns [`TestbedError::CommandFailed`] if the command wrote to
    /// stderr, and an I/O error if it could not be run.
    pub async fn run_command(&self, arguments: &[&str]) -> Result<String> {
        let Some((binary, rest)) = arguments.split_first() else {
            return Err(TestbedError::Config {
                message: "no command given".into(),
            });
        };
        let program = self.icommands.join(binary);
        tracing::debug!(command = %program.display(), "running icommand");

        let output = Command::new(&program)
            .args(rest)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| TestbedError::io(&program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            return Err(TestbedError::CommandFailed {
                command: arguments.join(" "),
                stdout: stdout.into_owned(),
                stderr: stderr.into_owned(),
            });
        }
        Ok(stdout.trim_end().to_string())
    }

    /// Path of the current working collection.
    ///
    /// # Errors
    ///
    /// Returns an error if `ipwd` fails.
    pub async fn current_directory(&self) -> Result<String> {
        self.run_command(&["ipwd"]).await
    }

    /// Creates a collection in the working collection and returns its path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `name` contains `/`, or an error if
    /// the icommands fail.
    pub async fn create_collection(&self, name: &str) -> Result<String> {
        reject_path(name, "collection")?;
        let _ = self.run_command(&["imkdir", name]).await?;
        Ok(format!("{}/{name}", self.current_directory().await?))
    }

    /// Uploads a data object with `contents` into the working collection and
    /// returns its path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `name` contains `/`, an I/O error if
    /// the local copy cannot be written, or an error if the icommands fail.
    pub async fn create_data_object(&self, name: &str, contents: &str) -> Result<String> {
        reject_path(name, "data object")?;
        tokio::fs::create_dir_all(&self.staging)
            .await
            .map_err(|e| TestbedError::io(&self.staging, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".iput-")
            .tempdir_in(&self.staging)
            .map_err(|e| TestbedError::io(&self.staging, e))?;
        let file = staging.path().join(name);
        tokio::fs::write(&file, contents)
            .await
            .map_err(|e| TestbedError::io(&file, e))?;

        let source = file.to_string_lossy().into_owned();
        let _ = self.run_command(&["iput", &source]).await?;
        Ok(format!("{}/{name}", self.current_directory().await?))
    }

    /// Whether `path` is a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if `ils` fails, e.g. because nothing exists at `path`.
    pub async fn is_collection(&self, path: &str) -> Result<bool> {
        Ok(self.run_command(&["ils", path]).await?.contains(':'))
    }

    /// Adds every `key = value` pair to the collection or data object at
    /// `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if any icommand fails.
    pub async fn add_metadata_to(
        &self,
        path: &str,
        metadata: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        let kind = if self.is_collection(path).await? { "-C" } else { "-d" };
        for (key, values) in metadata {
            for value in values {
                let _ = self
                    .run_command(&["imeta", "add", kind, path, key, value])
                    .await?;
            }
        }
        Ok(())
    }

    /// Forces checksums of every replica under `path` to be recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error if `ichksum` fails.
    pub async fn update_checksums(&self, path: &str) -> Result<()> {
        let _ = self
            .run_command(&["ichksum", "-f", "-a", "-r", path])
            .await?;
        Ok(())
    }

    /// Checksum of the most recently updated replica of a data object.
    ///
    /// Computes and stores the checksum if the server has none yet.
    ///
    /// # Errors
    ///
    /// Returns an error if `ichksum` fails or prints nothing.
    pub async fn get_checksum(&self, path: &str) -> Result<String> {
        let output = self.run_command(&["ichksum", path]).await?;
        output
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().last())
            .map(str::to_string)
            .ok_or_else(|| TestbedError::NotFound {
                kind: "checksum",
                id: path.to_string(),
            })
    }

    /// Replicates the data object at `path` to `resource`.
    ///
    /// # Errors
    ///
    /// Returns an error if `irepl` fails.
    pub async fn replicate_data_object(&self, path: &str, resource: &str) -> Result<()> {
        let _ = self
            .run_command(&["irepl", "-R", resource, path])
            .await?;
        Ok(())
    }

    /// Creates a unix file system resource to hold replicas.
    ///
    /// # Errors
    ///
    /// Returns an error if `iadmin` fails.
    pub async fn create_replica_storage(&self) -> Result<Resource> {
        let name = unique_name("replicas");
        let resource = Resource {
            location: format!("/tmp/{name}"),
            host: "localhost".into(),
            name,
        };
        let _ = self
            .run_command(&[
                "iadmin",
                "mkresc",
                &resource.name,
                "unix file system",
                "cache",
                &resource.host,
                &resource.location,
            ])
            .await?;
        Ok(resource)
    }

    /// Creates a regular user in `zone`.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if the user already exists, or an error
    /// if `iadmin` fails otherwise.
    pub async fn create_user(&self, username: &str, zone: &str) -> Result<User> {
        let qualified = format!("{username}#{zone}");
        match self
            .run_command(&["iadmin", "mkuser", &qualified, "rodsuser"])
            .await
        {
            Ok(_) => Ok(User {
                username: username.to_string(),
                zone: zone.to_string(),
                password: None,
                admin: false,
            }),
            Err(TestbedError::CommandFailed { stderr, .. }) if stderr.contains(DUPLICATE_ITEM) => {
                Err(TestbedError::InvalidState {
                    message: format!("user {qualified} already exists"),
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn reject_path(name: &str, kind: &str) -> Result<()> {
    if name.contains('/') {
        return Err(TestbedError::Config {
            message: format!("{kind} name cannot include '/': {name}"),
        });
    }
    Ok(())
}
