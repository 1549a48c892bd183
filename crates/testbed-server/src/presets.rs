//! Default images and users per catalog version.

use testbed_common::constants::DEFAULT_SERVER_PORT;
use testbed_common::error::Result;
use testbed_common::types::{CatalogVersion, Generation, ServerSpec, User};

/// Repository of the prebuilt catalog server images.
pub const SERVER_REPOSITORY: &str = "mercury/icat";

/// Image a version's server runs from.
#[must_use]
pub fn default_image(version: CatalogVersion) -> String {
    format!("{SERVER_REPOSITORY}:{version}")
}

/// Users baked into a version's server image; the first is the admin.
#[must_use]
pub fn default_users(version: CatalogVersion) -> Vec<User> {
    match version.generation() {
        Generation::Legacy => vec![User::new("rods", "iplant", "rods", true)],
        Generation::Structured => vec![User::new("rods", "testZone", "irods123", true)],
    }
}

/// The standard server spec for a version.
///
/// # Errors
///
/// Never fails for the built-in presets; the signature follows
/// [`ServerSpec::new`].
pub fn server_spec(version: CatalogVersion) -> Result<ServerSpec> {
    ServerSpec::new(
        default_image(version),
        version,
        default_users(version),
        DEFAULT_SERVER_PORT,
    )
}
