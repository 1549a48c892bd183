//! Choosing between a warm cache image and a base image.
//!
//! A server started from its base image has to initialise its catalog on
//! first boot. Once such a server is ready, its container is committed as
//! `<name>:<tag>-cached` and later starts use that snapshot instead.

use std::sync::Arc;

use testbed_common::error::{Result, TestbedError};
use testbed_runtime::ContainerRuntime;

use crate::reference::ImageRef;
use crate::source::{BuildContext, ImageSource};

/// Outcome of resolving a server image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Reference to create the container from.
    pub reference: ImageRef,
    /// Whether `reference` is the warm cache image.
    pub from_cache: bool,
}

/// Makes images available locally, preferring cache images.
#[derive(Clone)]
pub struct ImageResolver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl std::fmt::Debug for ImageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResolver")
            .field("endpoint", &self.runtime.endpoint())
            .finish()
    }
}

impl ImageResolver {
    /// Creates a resolver over a shared runtime.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Picks the best available image for `base`: the cache image if present,
    /// else the base image, pulling it when missing locally.
    ///
    /// # Errors
    ///
    /// Returns an image acquisition error if the base image has to be pulled
    /// and the pull fails. Pull failures are not retried.
    pub async fn resolve(&self, base: &ImageRef) -> Result<ResolvedImage> {
        let cached = base.cached();
        if self.runtime.image_exists(&cached.to_string()).await? {
            tracing::debug!(image = %cached, "using cached image");
            return Ok(ResolvedImage {
                reference: cached,
                from_cache: true,
            });
        }

        let _ = self
            .ensure_available(&ImageSource::Registry(base.clone()))
            .await?;
        Ok(ResolvedImage {
            reference: base.clone(),
            from_cache: false,
        })
    }

    /// Makes sure the image described by `source` exists locally, pulling or
    /// building it as needed, and returns its reference.
    ///
    /// # Errors
    ///
    /// Returns an image acquisition error if the pull or build fails.
    pub async fn ensure_available(&self, source: &ImageSource) -> Result<ImageRef> {
        let reference = source.reference().clone();
        match source {
            ImageSource::Registry(image) => {
                let name = image.to_string();
                if self.runtime.image_exists(&name).await? {
                    tracing::debug!(image = %name, "image present locally");
                } else {
                    self.runtime.pull_image(&name).await?;
                }
            }
            ImageSource::Build(context) => self.build(context).await?,
        }
        Ok(reference)
    }

    async fn build(&self, context: &BuildContext) -> Result<()> {
        let packing = context.clone();
        let request = tokio::task::spawn_blocking(move || packing.to_request())
            .await
            .map_err(|e| TestbedError::ImageAcquisition {
                image: context.tag.to_string(),
                message: format!("packing build context failed: {e}"),
            })??;
        tracing::info!(
            image = %context.tag,
            context = %context.directory().display(),
            bytes = request.context.len(),
            "building image"
        );
        self.runtime.build_image(&request).await
    }

    /// Commits `container` as the cache image of `base` unless that cache
    /// image already exists. Returns whether a commit happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check or the commit fails.
    pub async fn cache_container(&self, container: &str, base: &ImageRef) -> Result<bool> {
        let cached = base.cached();
        if self.runtime.image_exists(&cached.to_string()).await? {
            return Ok(false);
        }
        tracing::info!(container, image = %cached, "committing cache image");
        self.runtime
            .commit(container, cached.repository(), cached.tag())
            .await?;
        Ok(true)
    }
}
