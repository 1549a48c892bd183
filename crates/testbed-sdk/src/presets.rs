//! Client images paired with the server version they talk to.

use std::fmt;

use testbed_common::error::{Result, TestbedError};
use testbed_common::types::CatalogVersion;
use testbed_image::{ImageRef, ImageSource};

/// Repository of the prebuilt client images.
pub const CLIENT_REPOSITORY: &str = "mercury/baton";

/// A client image and the server version it was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientSetup {
    baton: &'static str,
    irods: CatalogVersion,
}

impl ClientSetup {
    /// Every published pairing.
    pub const ALL: [Self; 10] = [
        Self::new("0.16.1", CatalogVersion::V3_3_1),
        Self::new("0.16.2", CatalogVersion::V3_3_1),
        Self::new("0.16.2", CatalogVersion::V4_1_8),
        Self::new("0.16.3", CatalogVersion::V3_3_1),
        Self::new("0.16.3", CatalogVersion::V4_1_8),
        Self::new("0.16.4", CatalogVersion::V3_3_1),
        Self::new("0.16.4", CatalogVersion::V4_1_8),
        Self::new("0.16.4", CatalogVersion::V4_1_9),
        Self::new("0.17.0", CatalogVersion::V4_1_9),
        Self::new("0.17.0", CatalogVersion::V4_1_10),
    ];

    /// Newest pairing with a 3.x server.
    pub const LATEST_LEGACY: Self = Self::new("0.16.4", CatalogVersion::V3_3_1);

    /// Newest pairing with a 4.x server.
    pub const LATEST_STRUCTURED: Self = Self::new("0.17.0", CatalogVersion::V4_1_10);

    /// Pairing used when none is chosen.
    pub const DEFAULT: Self = Self::LATEST_STRUCTURED;

    const fn new(baton: &'static str, irods: CatalogVersion) -> Self {
        Self { baton, irods }
    }

    /// Finds the published pairing of a client and server version.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown server version or a pairing
    /// that was never published.
    pub fn lookup(baton: &str, irods: &str) -> Result<Self> {
        let irods = CatalogVersion::parse(irods)?;
        Self::ALL
            .into_iter()
            .find(|setup| setup.baton == baton && setup.irods == irods)
            .ok_or_else(|| TestbedError::NotFound {
                kind: "client setup",
                id: format!("baton {baton} with iRODS {irods}"),
            })
    }

    /// Client version.
    #[must_use]
    pub const fn baton_version(self) -> &'static str {
        self.baton
    }

    /// Server version the client talks to.
    #[must_use]
    pub const fn irods_version(self) -> CatalogVersion {
        self.irods
    }

    /// Client image tag.
    #[must_use]
    pub fn image(self) -> String {
        format!("{CLIENT_REPOSITORY}:{}-with-irods-{}", self.baton, self.irods)
    }

    /// Where the client image comes from.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in pairings; the signature follows
    /// [`ImageRef::parse`].
    pub fn image_source(self) -> Result<ImageSource> {
        Ok(ImageSource::Registry(ImageRef::parse(&self.image())?))
    }
}

impl Default for ClientSetup {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ClientSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "baton {} with iRODS {}", self.baton, self.irods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_latest_structured() {
        let setup = ClientSetup::default();
        assert_eq!(setup.image(), "mercury/baton:0.17.0-with-irods-4.1.10");
        assert_eq!(setup.irods_version(), CatalogVersion::V4_1_10);
    }

    #[test]
    fn lookup_finds_published_pairings_only() {
        let setup = ClientSetup::lookup("0.16.4", "3.3.1").unwrap();
        assert_eq!(setup, ClientSetup::LATEST_LEGACY);
        assert!(ClientSetup::lookup("0.16.1", "4.1.10").unwrap_err().is_not_found());
        assert!(ClientSetup::lookup("0.17.0", "5.0.0").is_err());
    }

    #[test]
    fn every_image_parses() {
        for setup in ClientSetup::ALL {
            let source = setup.image_source().unwrap();
            assert_eq!(source.reference().repository(), CLIENT_REPOSITORY);
        }
    }
}
