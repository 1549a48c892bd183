//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Name hint for server containers.
pub const SERVER_CONTAINER_HINT: &str = "irods";

/// Port the catalog service listens on inside its container.
pub const DEFAULT_SERVER_PORT: u16 = 1247;

/// Suffix appended to an image tag to name its warm cache image.
pub const CACHED_IMAGE_SUFFIX: &str = "-cached";

/// Environment variables that carry connection parameters into client containers.
pub mod env {
    /// Server host.
    pub const HOST: &str = "IRODS_HOST";
    /// Server port.
    pub const PORT: &str = "IRODS_PORT";
    /// Login name.
    pub const USERNAME: &str = "IRODS_USERNAME";
    /// Password.
    pub const PASSWORD: &str = "IRODS_PASSWORD";
    /// Zone.
    pub const ZONE: &str = "IRODS_ZONE";

    /// All connection variables, in the order they are injected.
    pub const ALL: [&str; 5] = [USERNAME, HOST, PORT, ZONE, PASSWORD];
}

/// Returns the data directory, preferring `$HOME/.testbed` and falling back
/// to the system temp directory.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".testbed");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    std::env::temp_dir().join("testbed")
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Binary name for the CLI.
pub const BIN_NAME: &str = "testbed";
