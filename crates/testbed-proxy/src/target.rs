//! The server a proxy set connects its clients to.

use testbed_common::constants::env;
use testbed_common::error::{Result, TestbedError};
use testbed_common::types::{ExternalServer, RunningServer, ServerEndpoint, User};

/// Hosts that resolve to the client container itself.
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Connection coordinates injected into client containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    host: String,
    port: u16,
    user: User,
    link: Option<String>,
}

impl ProxyTarget {
    /// Targets a containerised server through a container link named after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the server has no users.
    pub fn from_running(server: &RunningServer) -> Result<Self> {
        Ok(Self {
            host: server.name.clone(),
            port: server.port,
            user: server.default_user()?.clone(),
            link: Some(server.name.clone()),
        })
    }

    /// Targets a server reachable by address.
    ///
    /// # Errors
    ///
    /// Returns a config error for loopback hosts, which are unusable from
    /// inside a container, or if the server has no users.
    pub fn from_external(server: &ExternalServer) -> Result<Self> {
        if LOOPBACK_HOSTS.contains(&server.host.as_str()) {
            return Err(TestbedError::Config {
                message: format!(
                    "cannot connect to a server on {} - address is not usable inside a container",
                    server.host
                ),
            });
        }
        Ok(Self {
            host: server.host.clone(),
            port: server.port,
            user: server.default_user()?.clone(),
            link: None,
        })
    }

    /// Host clients connect to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port clients connect to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Identity clients use.
    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    /// `container:alias` link to the server container, if any.
    #[must_use]
    pub fn link(&self) -> Option<String> {
        self.link.as_ref().map(|name| format!("{name}:{name}"))
    }

    /// Connection environment, in injection order.
    #[must_use]
    pub fn env(&self) -> Vec<(String, String)> {
        [
            (env::USERNAME, self.user.username.clone()),
            (env::HOST, self.host.clone()),
            (env::PORT, self.port.to_string()),
            (env::ZONE, self.user.zone.clone()),
            (env::PASSWORD, self.user.password_or_empty().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use testbed_common::types::{CatalogVersion, ContainerId};

    use super::*;

    fn rods() -> User {
        User::new("rods", "iplant", "rods", true)
    }

    #[test]
    fn running_server_is_linked_by_name() {
        let server = RunningServer {
            id: ContainerId::new("abc"),
            name: "irods-1".into(),
            host: "irods-1".into(),
            port: 1247,
            published_port: Some(32768),
            version: CatalogVersion::V3_3_1,
            users: vec![rods()],
            started_at: Utc::now(),
        };
        let target = ProxyTarget::from_running(&server).unwrap();
        assert_eq!(target.link().as_deref(), Some("irods-1:irods-1"));
        assert_eq!(target.host(), "irods-1");
        assert_eq!(target.port(), 1247);
    }

    #[test]
    fn loopback_external_server_is_rejected() {
        for host in ["localhost", "127.0.0.1"] {
            let server = ExternalServer {
                host: host.into(),
                port: 1247,
                users: vec![rods()],
            };
            assert!(ProxyTarget::from_external(&server).is_err());
        }
    }

    #[test]
    fn env_carries_password_last() {
        let server = ExternalServer {
            host: "irods.example.org".into(),
            port: 1247,
            users: vec![rods()],
        };
        let env = ProxyTarget::from_external(&server).unwrap().env();
        let keys: Vec<_> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["IRODS_USERNAME", "IRODS_HOST", "IRODS_PORT", "IRODS_ZONE", "IRODS_PASSWORD"]
        );
        assert_eq!(env[4].1, "rods");
    }
}
