//! Store configuration, handed to the [`Archiver`] and [`Retriever`] at construction.
//!
//! [`Archiver`]: ../archiver/struct.Archiver.html
//! [`Retriever`]: ../retriever/struct.Retriever.html

use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::result::*;

/// Appended to every sanitized upload name to form its archive's file name.
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// Staging files are named `.zipdrop-XXXXXX.part`.
/// They never end in [`ARCHIVE_SUFFIX`], so the retriever never serves them.
pub(crate) const STAGING_PREFIX: &str = ".zipdrop-";
pub(crate) const STAGING_SUFFIX: &str = ".part";

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
const MIN_BUFFER_SIZE: usize = 512;
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// DEFLATE level 9: smallest output, slowest.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// What to do when an upload's archive name is already taken.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Publish under the next free `name_(n).zip`.
    #[default]
    Uniquify,
    /// Atomically replace the existing archive. The last writer to finish wins.
    Overwrite,
    /// Fail with [`ArchiveError::AlreadyExists`].
    ///
    /// [`ArchiveError::AlreadyExists`]: ../result/enum.ArchiveError.html#variant.AlreadyExists
    Reject,
}

impl FromStr for CollisionPolicy {
    type Err = ArchiveError;

    fn from_str(s: &str) -> ArchiveResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uniquify" => Ok(CollisionPolicy::Uniquify),
            "overwrite" => Ok(CollisionPolicy::Overwrite),
            "reject" => Ok(CollisionPolicy::Reject),
            other => Err(ArchiveError::Config(format!(
                "Unknown collision policy {other:?} (expected uniquify, overwrite, or reject)"
            ))),
        }
    }
}

/// Where archives live and how they're written.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    root: Utf8PathBuf,
    buffer_size: usize,
    compression_level: u32,
    collision: CollisionPolicy,
}

impl StoreConfig {
    /// Creates a configuration rooted at `root`, which must be an existing directory.
    ///
    /// The root is canonicalized once, here, so that containment checks
    /// compare against a single absolute path.
    pub fn new<P: AsRef<Utf8Path>>(root: P) -> ArchiveResult<Self> {
        let root = root.as_ref();
        let canonical = root.canonicalize_utf8().map_err(|e| {
            ArchiveError::Config(format!("Couldn't resolve archive root {root}: {e}"))
        })?;
        if !canonical.is_dir() {
            return Err(ArchiveError::Config(format!(
                "Archive root {canonical} is not a directory"
            )));
        }
        debug!("Archive root is {}", canonical);

        Ok(Self {
            root: canonical,
            buffer_size: DEFAULT_BUFFER_SIZE,
            compression_level: MAX_COMPRESSION_LEVEL,
            collision: CollisionPolicy::default(),
        })
    }

    /// Sets the size of the buffer used to copy uploads into the encoder.
    /// Clamped to [512 B, 16 MiB].
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }

    /// Sets the DEFLATE level, 0 (stored) through 9 (best).
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(MAX_COMPRESSION_LEVEL);
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision = policy;
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    pub fn collision_policy(&self) -> CollisionPolicy {
        self.collision
    }
}
