//! Discovery of the container engine endpoint.
//!
//! `DOCKER_HOST` wins when set. Otherwise the first existing well-known
//! socket is used: the system socket, then the Docker Desktop socket, then
//! the rootless socket.

use std::fmt;
use std::path::{Path, PathBuf};

use testbed_common::error::{Result, TestbedError};

/// Where the engine daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Taken from the `DOCKER_HOST` environment variable.
    Env(String),
    /// A local Unix socket.
    Socket(PathBuf),
}

impl Endpoint {
    /// Resolves the endpoint from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a connectivity error if `DOCKER_HOST` is unset and no
    /// well-known socket exists.
    pub fn resolve() -> Result<Self> {
        let docker_host = std::env::var("DOCKER_HOST").ok();
        Self::resolve_with(docker_host, &candidate_sockets())
    }

    /// Resolves the endpoint from explicit inputs.
    ///
    /// # Errors
    ///
    /// Returns a connectivity error if neither input yields an endpoint.
    pub fn resolve_with(docker_host: Option<String>, sockets: &[PathBuf]) -> Result<Self> {
        if let Some(host) = docker_host.filter(|h| !h.trim().is_empty()) {
            return Ok(Self::Env(host));
        }
        sockets
            .iter()
            .find(|p| p.exists())
            .map(|p| Self::Socket(p.clone()))
            .ok_or_else(|| TestbedError::Connectivity {
                endpoint: "<none>".into(),
                message: format!(
                    "DOCKER_HOST is not set and no engine socket was found (tried {}) - is the Docker daemon running?",
                    sockets
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env(host) => write!(f, "{host}"),
            Self::Socket(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Well-known socket locations, most common first.
#[must_use]
pub fn candidate_sockets() -> Vec<PathBuf> {
    sockets_for(
        std::env::var("HOME").ok().as_deref(),
        std::env::var("XDG_RUNTIME_DIR").ok().as_deref(),
        current_uid(),
    )
}

fn sockets_for(home: Option<&str>, runtime_dir: Option<&str>, uid: Option<u32>) -> Vec<PathBuf> {
    let mut sockets = vec![PathBuf::from("/var/run/docker.sock")];
    if let Some(home) = home {
        sockets.push(Path::new(home).join(".docker/run/docker.sock"));
    }
    if let Some(runtime_dir) = runtime_dir {
        sockets.push(Path::new(runtime_dir).join("docker.sock"));
    }
    if let Some(uid) = uid {
        let rootless = PathBuf::from(format!("/run/user/{uid}/docker.sock"));
        if !sockets.contains(&rootless) {
            sockets.push(rootless);
        }
    }
    sockets
}

#[cfg(unix)]
fn current_uid() -> Option<u32> {
    Some(nix::unistd::getuid().as_raw())
}

#[cfg(not(unix))]
const fn current_uid() -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_host_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        std::fs::write(&socket, b"").unwrap();

        let endpoint =
            Endpoint::resolve_with(Some("tcp://10.0.0.1:2375".into()), &[socket]).unwrap();
        assert_eq!(endpoint, Endpoint::Env("tcp://10.0.0.1:2375".into()));
    }

    #[test]
    fn first_existing_socket_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.sock");
        let present = dir.path().join("present.sock");
        std::fs::write(&present, b"").unwrap();

        let endpoint = Endpoint::resolve_with(None, &[missing, present.clone()]).unwrap();
        assert_eq!(endpoint, Endpoint::Socket(present));
    }

    #[test]
    fn blank_docker_host_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let err = Endpoint::resolve_with(Some("  ".into()), &[dir.path().join("nope.sock")])
            .expect_err("no endpoint");
        assert!(matches!(err, TestbedError::Connectivity { .. }));
    }

    #[test]
    fn rootless_socket_is_found_by_uid() {
        let sockets = sockets_for(Some("/home/dev"), None, Some(1000));
        assert_eq!(
            sockets,
            vec![
                PathBuf::from("/var/run/docker.sock"),
                PathBuf::from("/home/dev/.docker/run/docker.sock"),
                PathBuf::from("/run/user/1000/docker.sock"),
            ]
        );

        let with_runtime_dir = sockets_for(None, Some("/run/user/1000"), Some(1000));
        assert_eq!(
            with_runtime_dir,
            vec![
                PathBuf::from("/var/run/docker.sock"),
                PathBuf::from("/run/user/1000/docker.sock"),
            ]
        );
    }

    #[test]
    fn socket_endpoint_displays_as_url() {
        let endpoint = Endpoint::Socket(PathBuf::from("/var/run/docker.sock"));
        assert_eq!(endpoint.to_string(), "unix:///var/run/docker.sock");
    }
}
