//! # testbed-image
//!
//! Image handling for testbed servers and clients.
//!
//! Handles:
//! - **References**: parsing `[registry[:port]/]name[:tag]` and deriving the
//!   warm cache reference of an image.
//! - **Sources**: registry images and local Dockerfile builds, with build
//!   contexts packed as gzip tar archives.
//! - **Resolution**: choosing a cached image over a base image and
//!   committing new cache images.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod reference;
pub mod resolver;
pub mod source;

pub use reference::ImageRef;
pub use resolver::{ImageResolver, ResolvedImage};
pub use source::{BuildContext, ImageSource};
