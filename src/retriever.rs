//! Serving archives back by name.
//!
//! Identifiers come straight from the request, percent-encoded and hostile
//! until proven otherwise. They're decoded, resolved lexically against the
//! archive root, and only served if the result is a regular file sitting
//! directly inside the root.

use std::fs::{File, Metadata};
use std::io::{self, Read};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::*;

use crate::config::*;
use crate::read::{ArchiveReader, EntryMetadata};
use crate::result::*;

/// Percent-encodes an archive name so it can be embedded in a URL path segment.
pub fn identifier_for(archive_name: &str) -> String {
    urlencoding::encode(archive_name).into_owned()
}

/// An archive found in the store, opened for reading.
#[derive(Debug)]
pub struct Fetched {
    /// The open archive file, positioned at its start.
    pub file: File,
    /// The archive's decoded name, suitable as a download file name.
    pub name: String,
    /// Size of the archive in bytes
    pub len: u64,
}

impl Fetched {
    /// Opens the archive's single entry for reading, decompressing as it goes.
    pub fn into_entry(self) -> ArchiveResult<(EntryMetadata, Box<dyn Read + Send>)> {
        let reader = ArchiveReader::new(self.file)?;
        let entry = reader.single_entry()?.clone();
        let contents = reader.into_entry_reader(&entry)?;
        Ok((entry, contents))
    }
}

/// Looks up archives in the configured root.
#[derive(Debug, Clone)]
pub struct Retriever {
    config: StoreConfig,
}

impl Retriever {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens the archive named by the percent-encoded `raw_identifier`.
    ///
    /// Fails with [`ArchiveError::InvalidIdentifier`] if the identifier doesn't
    /// decode or points outside the root, and [`ArchiveError::NotFound`] if
    /// there's no archive by that name. Never modifies the store.
    ///
    /// [`ArchiveError::InvalidIdentifier`]: ../result/enum.ArchiveError.html#variant.InvalidIdentifier
    /// [`ArchiveError::NotFound`]: ../result/enum.ArchiveError.html#variant.NotFound
    pub fn fetch(&self, raw_identifier: &str) -> ArchiveResult<Fetched> {
        let (path, name) = self.resolve(raw_identifier)?;

        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No archive at {}", path);
                return Err(ArchiveError::NotFound(name));
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.file_type().is_symlink() {
            warn!("Refusing to follow symlink {} for {:?}", path, raw_identifier);
            return Err(ArchiveError::InvalidIdentifier(raw_identifier.to_owned()));
        }
        if !metadata.is_file() || !name.ends_with(ARCHIVE_SUFFIX) {
            debug!("{} isn't an archive", path);
            return Err(ArchiveError::NotFound(name));
        }

        let file = match File::open(&path) {
            Ok(f) => f,
            // Deleted between the lookup and now.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(name))
            }
            Err(e) => return Err(e.into()),
        };
        let opened = file.metadata()?;
        if !same_file(&metadata, &opened) {
            warn!("{} changed between lookup and open; refusing it", path);
            return Err(ArchiveError::InvalidIdentifier(raw_identifier.to_owned()));
        }
        let len = opened.len();
        debug!("Serving {} ({} bytes)", path, len);
        Ok(Fetched { file, name, len })
    }

    /// Decodes `raw_identifier` and resolves it to a path directly inside the root,
    /// without touching the filesystem.
    /// Returns that path and the decoded name.
    pub fn resolve(&self, raw_identifier: &str) -> ArchiveResult<(Utf8PathBuf, String)> {
        let invalid = || {
            warn!("Rejected archive identifier {:?}", raw_identifier);
            ArchiveError::InvalidIdentifier(raw_identifier.to_owned())
        };

        let decoded = urlencoding::decode(raw_identifier).map_err(|_| invalid())?;
        if decoded.is_empty() || decoded.contains('\0') || decoded.contains('\\') {
            return Err(invalid());
        }

        let root = self.config.root();
        let resolved = normalize(&root.join(decoded.as_ref()));
        if resolved.parent() != Some(root) {
            return Err(invalid());
        }
        let name = match resolved.file_name() {
            Some(name) => name.to_owned(),
            None => return Err(invalid()),
        };
        trace!("{:?} resolved to {}", raw_identifier, resolved);
        Ok((resolved, name))
    }
}

/// Whether `looked_up` (from `symlink_metadata`) and `opened` (from the open handle)
/// describe the same regular file.
/// A symlink swapped in after the lookup is followed by `open`, and fails this.
#[cfg(unix)]
fn same_file(looked_up: &Metadata, opened: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    opened.is_file() && looked_up.dev() == opened.dev() && looked_up.ino() == opened.ino()
}

#[cfg(not(unix))]
fn same_file(looked_up: &Metadata, opened: &Metadata) -> bool {
    opened.is_file() && looked_up.len() == opened.len()
}

/// Collapses `.` and `..` the way the filesystem would, without asking it
/// (so nothing has to exist, and symlinks aren't followed).
/// `..` at the root stays at the root.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut normalized = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir | Utf8Component::Normal(_) => {
                normalized.push(component.as_str());
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                normalized.pop();
            }
        }
    }
    normalized
}
