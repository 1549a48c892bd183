//! # testbed-sdk
//!
//! Public SDK for testing against a disposable catalog server.
//!
//! Provides three main entry points:
//! - [`TestBed`](testbed::TestBed): starts a server (or adopts an external
//!   one) and writes baton and icommand proxies pointed at it.
//! - [`ClientSetup`](presets::ClientSetup): published client images paired
//!   with the server version they were built against.
//! - [`SetupHelper`](helper::SetupHelper): seeds collections, data objects,
//!   metadata and users through the icommand proxies.
//!
//! # Example
//!
//! ```rust,no_run
//! use testbed_sdk::presets::ClientSetup;
//! use testbed_sdk::testbed::TestBed;
//!
//! # async fn run() -> testbed_common::error::Result<()> {
//! let mut testbed = TestBed::builder()
//!     .client_setup(ClientSetup::LATEST_LEGACY)
//!     .build()?;
//! testbed.setup().await?;
//! if let Some(helper) = testbed.helper() {
//!     let _collection = helper.create_collection("fixtures").await?;
//! }
//! testbed.tear_down().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod helper;
pub mod presets;
pub mod testbed;

pub use helper::SetupHelper;
pub use presets::ClientSetup;
pub use testbed::{SetupState, TestBed, TestBedBuilder};
