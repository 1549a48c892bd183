//! # testbed-proxy
//!
//! Stand-in executables for catalog client binaries.
//!
//! Each generated script runs its binary inside a container connected to the
//! test server, so test code can call `ils` or `baton-list` as if they were
//! installed locally. In shared mode every script execs into one long-lived
//! container; the first caller starts it while holding a cross-process lock.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod generator;
pub mod lock;
pub mod proxyset;
pub mod script;
pub mod suites;
pub mod target;

pub use generator::ProxyGenerator;
pub use lock::ColdStartLock;
pub use proxyset::{ProxySet, SharedContainer};
pub use script::ProxyBinary;
pub use suites::Suite;
pub use target::ProxyTarget;
