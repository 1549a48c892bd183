//! # testbed-server
//!
//! Starts disposable catalog servers in containers and hands them out only
//! once they are ready for queries.
//!
//! Handles:
//! - **Lifecycle**: create, start, wait for readiness, retry, commit a warm
//!   cache image, stop.
//! - **Readiness**: per-generation log markers and liveness probes.
//! - **Settings**: client connection files in the format each generation
//!   expects.
//! - **Pools**: keeping servers hot in the background.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod controller;
pub mod external;
pub mod pool;
pub mod presets;
pub mod readiness;
pub mod settings;

pub use controller::{ServerController, StartPolicy};
pub use pool::ServerPool;
pub use settings::ConnectionSettings;
