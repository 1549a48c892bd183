//! Image references.

use std::fmt;

use testbed_common::constants::CACHED_IMAGE_SUFFIX;
use testbed_common::error::{Result, TestbedError};

/// Tag used when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed `[registry[:port]/]name[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    repository: String,
    tag: Option<String>,
}

impl ImageRef {
    /// Parses an image reference.
    ///
    /// A colon only separates a tag when it follows the last `/`, so a
    /// registry port (`registry:5000/name`) is kept in the repository.
    ///
    /// # Errors
    ///
    /// Returns a config error for empty references, empty components, or
    /// references containing whitespace.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |why: &str| TestbedError::Config {
            message: format!("invalid image reference {reference:?}: {why}"),
        };
        if reference.is_empty() {
            return Err(invalid("empty"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let name_start = reference.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match reference[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&reference[..split], Some(&reference[split + 1..]))
            }
            None => (reference, None),
        };

        if repository.is_empty() || repository.ends_with('/') {
            return Err(invalid("missing name"));
        }
        if tag.is_some_and(str::is_empty) {
            return Err(invalid("empty tag"));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.map(str::to_string),
        })
    }

    /// Repository, including any registry prefix.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, defaulting to `latest`.
    #[must_use]
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// The deterministic warm cache reference for this image.
    ///
    /// `mercury/icat:4.1.8` becomes `mercury/icat:4.1.8-cached`.
    #[must_use]
    pub fn cached(&self) -> Self {
        if self.is_cached() {
            return self.clone();
        }
        Self {
            repository: self.repository.clone(),
            tag: Some(format!("{}{CACHED_IMAGE_SUFFIX}", self.tag())),
        }
    }

    /// Returns whether this already is a cache reference.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.tag().ends_with(CACHED_IMAGE_SUFFIX)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag())
    }
}

impl std::str::FromStr for ImageRef {
    type Err = TestbedError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_tag() {
        let image = ImageRef::parse("mercury/icat:4.1.8").unwrap();
        assert_eq!(image.repository(), "mercury/icat");
        assert_eq!(image.tag(), "4.1.8");
    }

    #[test]
    fn untagged_defaults_to_latest() {
        let image = ImageRef::parse("test-server").unwrap();
        assert_eq!(image.tag(), "latest");
        assert_eq!(image.to_string(), "test-server:latest");
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let image = ImageRef::parse("registry.local:5000/mercury/baton").unwrap();
        assert_eq!(image.repository(), "registry.local:5000/mercury/baton");
        assert_eq!(image.tag(), "latest");

        let image = ImageRef::parse("registry.local:5000/mercury/baton:0.17.0").unwrap();
        assert_eq!(image.repository(), "registry.local:5000/mercury/baton");
        assert_eq!(image.tag(), "0.17.0");
    }

    #[test]
    fn cached_reference_is_deterministic() {
        let image = ImageRef::parse("test-server:1.0").unwrap();
        assert_eq!(image.cached().to_string(), "test-server:1.0-cached");
        assert_eq!(image.cached(), image.cached().cached());
        assert!(image.cached().is_cached());
        assert!(!image.is_cached());
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", "a b", "name:", "registry:5000/", ":tag"] {
            assert!(ImageRef::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
