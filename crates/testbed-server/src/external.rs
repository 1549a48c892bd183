//! Servers that already run outside the testbed.
//!
//! When `IRODS_HOST`, `IRODS_PORT`, `IRODS_USERNAME`, `IRODS_PASSWORD` and
//! `IRODS_ZONE` are all set, tests can target that server instead of
//! starting one. The testbed never stops an external server.

use testbed_common::constants::env;
use testbed_common::error::{Result, TestbedError};
use testbed_common::types::{ExternalServer, User};

/// Reads an external server from the process environment.
///
/// # Errors
///
/// Returns a config error if `IRODS_PORT` is set but not a valid port.
pub fn from_env() -> Result<Option<ExternalServer>> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Reads an external server through `lookup`. Returns `None` unless every
/// connection variable is present.
///
/// # Errors
///
/// Returns a config error if the port is not a positive integer.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<ExternalServer>> {
    let values: Option<Vec<String>> = env::ALL.iter().map(|key| lookup(key)).collect();
    let Some([username, host, port, zone, password]) =
        values.and_then(|v| <[String; 5]>::try_from(v).ok())
    else {
        return Ok(None);
    };

    let port: u16 = port
        .trim()
        .parse()
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| TestbedError::Config {
            message: format!("{} must be a port number, got {port:?}", env::PORT),
        })?;

    tracing::info!(%host, port, "using external server");
    Ok(Some(ExternalServer {
        host,
        port,
        users: vec![User::new(username, zone, password, true)],
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const FULL: [(&str, &str); 5] = [
        ("IRODS_HOST", "irods.example.org"),
        ("IRODS_PORT", "1247"),
        ("IRODS_USERNAME", "rods"),
        ("IRODS_PASSWORD", "rods"),
        ("IRODS_ZONE", "iplant"),
    ];

    #[test]
    fn all_variables_yield_a_server() {
        let server = from_lookup(lookup(&FULL)).unwrap().unwrap();
        assert_eq!(server.host, "irods.example.org");
        assert_eq!(server.port, 1247);
        assert_eq!(server.users[0].username, "rods");
        assert_eq!(server.users[0].zone, "iplant");
    }

    #[test]
    fn any_missing_variable_yields_none() {
        for skip in 0..FULL.len() {
            let partial: Vec<_> = FULL
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, p)| *p)
                .collect();
            assert!(from_lookup(lookup(&partial)).unwrap().is_none());
        }
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut pairs = FULL;
        pairs[1] = ("IRODS_PORT", "zero");
        assert!(from_lookup(lookup(&pairs)).is_err());
    }
}
