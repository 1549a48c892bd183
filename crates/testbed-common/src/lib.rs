//! # testbed-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire testbed workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate. It holds the server and user models, the error kinds,
//! and the unique name generator that the other crates build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod naming;
pub mod types;
