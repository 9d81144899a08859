//! Configuration for creating and opening compound files.

use serde::{Deserialize, Serialize};

use super::consts::MAXREGSECT;
use super::header::Version;

/// Options controlling how a compound file is created or opened.
///
/// # Examples
///
/// ```rust
/// use litchi_cfb::ole::{CompoundFileOptions, Version};
///
/// // Create with defaults (version 3, 512-byte sectors)
/// let options = CompoundFileOptions::default();
///
/// // Or customize
/// let options = CompoundFileOptions::new()
///     .with_version(Version::V4)
///     .with_sector_limit(1 << 20)
///     .with_verify_on_open(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundFileOptions {
    /// Format version of newly created containers. Opened containers keep their own.
    pub version: Version,
    /// Maximum number of sectors the sector store may hold
    pub sector_limit: u32,
    /// Run the full integrity check while opening
    pub verify_on_open: bool,
}

impl Default for CompoundFileOptions {
    fn default() -> Self {
        Self {
            version: Version::V3,
            sector_limit: MAXREGSECT + 1,
            verify_on_open: false,
        }
    }
}

impl CompoundFileOptions {
    /// Create a new `CompoundFileOptions` with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the format version used by [`CompoundFile::create_with_options`].
    ///
    /// [`CompoundFile::create_with_options`]: super::CompoundFile::create_with_options
    #[inline]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Cap the number of sectors. Growing past it fails with `StorageFull`.
    ///
    /// The cap is clamped to the largest regular sector count the format can address.
    #[inline]
    pub fn with_sector_limit(mut self, limit: u32) -> Self {
        self.sector_limit = limit.min(MAXREGSECT + 1);
        self
    }

    /// Set whether opening runs [`CompoundFile::check_integrity`].
    ///
    /// [`CompoundFile::check_integrity`]: super::CompoundFile::check_integrity
    #[inline]
    pub fn with_verify_on_open(mut self, verify: bool) -> Self {
        self.verify_on_open = verify;
        self
    }
}
