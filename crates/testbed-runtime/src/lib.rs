//! Container engine access for the testbed.
//!
//! Every other crate talks to the engine through the
//! [`ContainerRuntime`](backend::ContainerRuntime) trait. [`DockerRuntime`]
//! is the production implementation; [`mock::MockRuntime`] records calls and
//! replays scripted logs for tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod endpoint;
pub mod exec;
pub mod guard;
pub mod logs;
pub mod mock;

pub use backend::docker::DockerRuntime;
pub use backend::{BuildRequest, ContainerConfig, ContainerInfo, ContainerRuntime, HostPort, LogStream};
pub use exec::ExecOutput;
pub use guard::ContainerGuard;
