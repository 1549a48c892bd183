//! Where an image comes from: a registry or a local Dockerfile build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use testbed_common::error::{Result, TestbedError};
use testbed_runtime::BuildRequest;

use crate::reference::ImageRef;

/// Dockerfile name used when a build context names none.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Origin of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Pulled from a registry.
    Registry(ImageRef),
    /// Built from a local directory.
    Build(BuildContext),
}

impl ImageSource {
    /// Reference the image is known by once available.
    #[must_use]
    pub const fn reference(&self) -> &ImageRef {
        match self {
            Self::Registry(image) => image,
            Self::Build(context) => &context.tag,
        }
    }
}

/// A local Dockerfile build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Tag given to the built image.
    pub tag: ImageRef,
    /// Root of the build context.
    pub directory: PathBuf,
    /// Dockerfile path relative to `directory`.
    pub dockerfile: String,
    /// Build arguments.
    pub build_args: HashMap<String, String>,
}

impl BuildContext {
    /// Creates a context that builds `directory/Dockerfile` as `tag`.
    #[must_use]
    pub fn new(tag: ImageRef, directory: impl Into<PathBuf>) -> Self {
        Self {
            tag,
            directory: directory.into(),
            dockerfile: DEFAULT_DOCKERFILE.into(),
            build_args: HashMap::new(),
        }
    }

    /// Uses a Dockerfile other than `Dockerfile`.
    #[must_use]
    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    /// Adds a build argument.
    #[must_use]
    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.build_args.insert(key.into(), value.into());
        self
    }

    /// Packs the context directory into a gzip-compressed tar archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or its Dockerfile is missing, or if
    /// archiving fails.
    pub fn pack(&self) -> Result<Vec<u8>> {
        if !self.directory.is_dir() {
            return Err(TestbedError::NotFound {
                kind: "build context",
                id: self.directory.display().to_string(),
            });
        }
        let dockerfile = self.directory.join(&self.dockerfile);
        if !dockerfile.is_file() {
            return Err(TestbedError::NotFound {
                kind: "Dockerfile",
                id: dockerfile.display().to_string(),
            });
        }

        tracing::debug!(directory = %self.directory.display(), "packing build context");
        let io_err = |e| TestbedError::io(&self.directory, e);
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder
            .append_dir_all(".", &self.directory)
            .map_err(io_err)?;
        builder
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(io_err)
    }

    /// Packs the context into an engine build request.
    ///
    /// # Errors
    ///
    /// Returns an error if packing fails.
    pub fn to_request(&self) -> Result<BuildRequest> {
        Ok(BuildRequest {
            tag: self.tag.to_string(),
            dockerfile: self.dockerfile.clone(),
            build_args: self.build_args.clone(),
            context: self.pack()?,
        })
    }

    /// Root of the build context.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
