//! Tools for reading an archive back.
//!
//! Archives in the store hold a single entry, so this is a much smaller
//! reader than a general-purpose one: it reads the end records and the
//! central directory from a seekable source, then streams one entry out
//! through a DEFLATE decoder, checking the CRC-32 at the end.
//! Nothing here loads the entry's contents into memory.
//!
//! Anything named `*.zip` in the store is served, including archives some
//! other tool put there, so the reader also handles stored (uncompressed)
//! entries and refuses encrypted ones instead of returning garbage.

use std::io::{self, Read, Seek, SeekFrom};

use chrono::NaiveDateTime;
use flate2::read::DeflateDecoder;
use log::*;

use crate::arch::usize;
use crate::checksum::Crc32Reader;
use crate::result::*;
use crate::spec;

/// Largest central directory we'll read into memory.
/// A single-entry archive needs well under a kilobyte.
const MAX_CENTRAL_DIRECTORY_SIZE: u64 = 1024 * 1024;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed.
    /// We never write this, but other tools do.
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is what we write.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// Metadata for an entry in the archive,
/// retrieved from its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// The entry's name (the original upload's sanitized name)
    pub name: String,

    /// Uncompressed size of the entry in bytes
    pub size: u64,

    /// Compressed size of the entry in bytes
    pub compressed_size: u64,

    /// Compression algorithm used to store the entry
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed entry
    pub crc32: u32,

    /// True if the entry is encrypted (decryption is unsupported).
    /// Only possible for archives written by other tools.
    pub encrypted: bool,

    /// When the entry was last modified, if the DOS timestamp was a real date
    pub last_modified: Option<NaiveDateTime>,

    /// Unix mode bits, if the entry was archived in a Unix OS.
    pub unix_mode: Option<u16>,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: u64,
}

/// An archive to be read
pub struct ArchiveReader<R> {
    inner: R,
    entries: Vec<EntryMetadata>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Reads an archive's central directory.
    ///
    /// Only the tail of the archive and the directory itself are read;
    /// entry data is left alone until [`into_entry_reader()`].
    ///
    /// [`into_entry_reader()`]: #method.into_entry_reader
    pub fn new(mut inner: R) -> ArchiveResult<Self> {
        let archive_len = inner.seek(SeekFrom::End(0))?;

        // The EOCDR is 22 bytes plus a comment of up to 64K,
        // and a Zip64 locator can sit right before it.
        let search_window = (spec::EndOfCentralDirectory::SIZE_IN_FILE
            + u16::MAX as usize
            + spec::Zip64EndOfCentralDirectoryLocator::SIZE_IN_FILE) as u64;
        let tail_start = archive_len.saturating_sub(search_window);
        let mut tail = vec![0u8; usize(archive_len - tail_start)?];
        inner.seek(SeekFrom::Start(tail_start))?;
        inner.read_exact(&mut tail)?;

        let eocdr_posit = spec::find_eocdr(&tail)?;
        let eocdr = spec::EndOfCentralDirectory::parse(&tail[eocdr_posit..])?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ArchiveError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ArchiveError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }

        let central_directory_offset: u64;
        let central_directory_size: u64;
        let entry_count: u64;

        let zip64_locator = eocdr_posit
            .checked_sub(spec::Zip64EndOfCentralDirectoryLocator::SIZE_IN_FILE)
            .and_then(|posit| spec::Zip64EndOfCentralDirectoryLocator::parse(&tail[posit..]));
        if let Some(zip64_locator) = zip64_locator {
            trace!("{:?}", zip64_locator);

            if zip64_locator.disks != 1 {
                return Err(ArchiveError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                    zip64_locator.disks
                )));
            }

            let mut record = [0u8; spec::Zip64EndOfCentralDirectory::SIZE_IN_FILE];
            inner.seek(SeekFrom::Start(zip64_locator.zip64_eocdr_offset))?;
            inner.read_exact(&mut record).map_err(|_| {
                ArchiveError::InvalidArchive("Truncated Zip64 End Of Central Directory Record")
            })?;
            let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(&record)?;
            trace!("{:?}", zip64_eocdr);

            central_directory_offset = zip64_eocdr.central_directory_offset;
            central_directory_size = zip64_eocdr.central_directory_size;
            entry_count = zip64_eocdr.entries;
        } else {
            central_directory_offset = eocdr.central_directory_offset as u64;
            central_directory_size = eocdr.central_directory_size as u64;
            entry_count = eocdr.entries as u64;
        }

        let directory_end = central_directory_offset
            .checked_add(central_directory_size)
            .filter(|end| *end <= archive_len)
            .ok_or(ArchiveError::InvalidArchive(
                "Invalid central directory size or offset",
            ))?;
        if central_directory_size > MAX_CENTRAL_DIRECTORY_SIZE {
            return Err(ArchiveError::UnsupportedArchive(format!(
                "Central directory of {} bytes is too large",
                central_directory_size
            )));
        }
        trace!(
            "{} entries at offset {}..{}",
            entry_count,
            central_directory_offset,
            directory_end
        );

        let mut directory = vec![0u8; usize(central_directory_size)?];
        inner.seek(SeekFrom::Start(central_directory_offset))?;
        inner.read_exact(&mut directory)?;

        // Each entry takes at least 46 bytes, so the count can't be absurd here.
        let mut entries = Vec::with_capacity(usize(entry_count.min(directory.len() as u64 / 46))?);
        let mut cursor = directory.as_slice();
        for _ in 0..entry_count {
            let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut cursor)?;
            trace!("{:?}", dir_entry);

            let metadata = EntryMetadata::from_cde(&dir_entry)?;
            debug!("{:?}", metadata);
            entries.push(metadata);
        }

        Ok(ArchiveReader { inner, entries })
    }

    /// Returns the entries found in the archive's central directory.
    pub fn entries(&self) -> &[EntryMetadata] {
        &self.entries
    }

    /// Returns the archive's only entry, or an error if it doesn't have exactly one.
    pub fn single_entry(&self) -> ArchiveResult<&EntryMetadata> {
        match self.entries.as_slice() {
            [entry] => Ok(entry),
            others => Err(ArchiveError::UnsupportedArchive(format!(
                "Expected exactly one entry, found {}",
                others.len()
            ))),
        }
    }

    /// Consumes the archive and returns a reader over the given entry's
    /// decompressed contents. The CRC-32 and size are checked
    /// when the reader reaches the end of the entry.
    pub fn into_entry_reader(
        mut self,
        metadata: &EntryMetadata,
    ) -> ArchiveResult<Box<dyn Read + Send>>
    where
        R: Send + 'static,
    {
        if metadata.encrypted {
            return Err(ArchiveError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                metadata.name
            )));
        }

        let mut fixed = [0u8; spec::LocalFileHeader::FIXED_SIZE_IN_FILE];
        self.inner.seek(SeekFrom::Start(metadata.header_offset))?;
        self.inner
            .read_exact(&mut fixed)
            .map_err(|_| ArchiveError::InvalidArchive("Truncated local file header"))?;
        let mut header = fixed.to_vec();
        header.resize(fixed.len() + spec::LocalFileHeader::variable_len(&fixed)?, 0);
        self.inner
            .read_exact(&mut header[fixed.len()..])
            .map_err(|_| ArchiveError::InvalidArchive("Truncated local file header"))?;

        let mut cursor = header.as_slice();
        let local_header = spec::LocalFileHeader::parse_and_consume(&mut cursor)?;
        trace!("{:?}", local_header);
        let local_name = spec::decode_name(local_header.path, local_header.flags)?;
        if local_name != metadata.name
            || local_header.compression_method != metadata.compression_method.as_u16()
        {
            return Err(ArchiveError::InvalidArchive(
                "Central directory entry doesn't match local file header",
            ));
        }
        debug!("Reading {:?}", metadata);

        // We're now positioned at the start of the entry's data.
        make_reader(
            metadata.compression_method,
            metadata.crc32,
            metadata.size,
            self.inner.take(metadata.compressed_size),
        )
    }
}

/// Returns a boxed read trait for a compressed file,
/// given its compression method, expected CRC, and expected size.
fn make_reader<R: io::Read + Send + 'static>(
    compression_method: CompressionMethod,
    crc32: u32,
    size: u64,
    reader: R,
) -> ArchiveResult<Box<dyn io::Read + Send>> {
    match compression_method {
        CompressionMethod::None => Ok(Box::new(Crc32Reader::new(reader, crc32, size))),
        CompressionMethod::Deflate => {
            let deflate_reader = DeflateDecoder::new(reader);
            Ok(Box::new(Crc32Reader::new(deflate_reader, crc32, size)))
        }
        _ => Err(ArchiveError::UnsupportedArchive(String::from(
            "Compression method not supported",
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::write::EntryWriter;
    use std::io::{Cursor, Write};

    fn archive(name: &str, contents: &[u8]) -> Vec<u8> {
        let now = chrono::Local::now().naive_local();
        let mut writer = EntryWriter::new(Vec::new(), name, 9, &now).unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap().0
    }

    #[test]
    fn garbage_is_invalid() {
        let err = ArchiveReader::new(Cursor::new(b"definitely not a zip".to_vec())).err();
        assert!(matches!(err, Some(ArchiveError::InvalidArchive(_))));

        let err = ArchiveReader::new(Cursor::new(Vec::new())).err();
        assert!(matches!(err, Some(ArchiveError::InvalidArchive(_))));
    }

    #[test]
    fn truncated_archive_is_invalid() {
        let bytes = archive("a.txt", b"hello hello hello");
        // Chop off the front: the end records now point past the data we have.
        let chopped = bytes[20..].to_vec();
        assert!(ArchiveReader::new(Cursor::new(chopped)).is_err());
    }

    #[test]
    fn corrupted_entry_fails_checksum() {
        let contents = b"the quick brown fox jumps over the lazy dog";
        let mut bytes = archive("fox.txt", contents);
        let reader = ArchiveReader::new(Cursor::new(bytes.clone())).unwrap();
        let mut entry = reader.single_entry().unwrap().clone();
        entry.crc32 ^= 1;

        let mut out = Vec::new();
        let result = reader
            .into_entry_reader(&entry)
            .unwrap()
            .read_to_end(&mut out);
        assert!(result.is_err());

        // Renaming the entry in the local header is caught before decompression.
        let name_at = spec::LocalFileHeader::FIXED_SIZE_IN_FILE;
        bytes[name_at] = b'F';
        let reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();
        let entry = reader.single_entry().unwrap().clone();
        assert!(matches!(
            reader.into_entry_reader(&entry).err(),
            Some(ArchiveError::InvalidArchive(_))
        ));
    }

    /// Builds a single-entry archive by hand, the way another tool might.
    fn foreign_archive(contents: &[u8], method: u16, flags: u16) -> Vec<u8> {
        let crc32 = crc32fast::hash(contents);
        let mut bytes = Vec::new();
        spec::LocalFileHeader {
            minimum_extract_version: 10,
            flags,
            compression_method: method,
            last_modified_time: 0,
            last_modified_date: 0,
            crc32,
            compressed_size: contents.len() as u32,
            uncompressed_size: contents.len() as u32,
            path: b"plain.txt",
            extra_field: &[],
        }
        .write(&mut bytes);
        bytes.extend_from_slice(contents);

        let central_directory_offset = bytes.len();
        spec::CentralDirectoryEntry {
            source_version: 10, // MS-DOS
            minimum_extract_version: 10,
            flags,
            compression_method: method,
            last_modified_time: 0,
            last_modified_date: 0,
            crc32,
            compressed_size: contents.len() as u64,
            uncompressed_size: contents.len() as u64,
            disk_number: 0,
            internal_file_attributes: 0,
            external_file_attributes: 0,
            header_offset: 0,
            path: b"plain.txt",
            extra_field: &[],
        }
        .write(&mut bytes);
        let central_directory_size = bytes.len() - central_directory_offset;

        spec::EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 1,
            entries: 1,
            central_directory_size: central_directory_size as u32,
            central_directory_offset: central_directory_offset as u32,
        }
        .write(&mut bytes);
        bytes
    }

    #[test]
    fn reads_stored_entries_from_other_tools() {
        let contents = b"not compressed at all";
        let reader = ArchiveReader::new(Cursor::new(foreign_archive(contents, 0, 0))).unwrap();
        let entry = reader.single_entry().unwrap().clone();
        assert_eq!(entry.compression_method, CompressionMethod::None);
        assert_eq!(entry.unix_mode, None);
        assert_eq!(entry.last_modified, None);

        let mut out = Vec::new();
        reader.into_entry_reader(&entry).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, contents);
    }

    #[test]
    fn refuses_encrypted_and_unknown_entries() {
        let reader = ArchiveReader::new(Cursor::new(foreign_archive(b"secret", 0, 1))).unwrap();
        let entry = reader.single_entry().unwrap().clone();
        assert!(entry.encrypted);
        assert!(matches!(
            reader.into_entry_reader(&entry).err(),
            Some(ArchiveError::UnsupportedArchive(_))
        ));

        // 14 is LZMA.
        let reader = ArchiveReader::new(Cursor::new(foreign_archive(b"lzma?", 14, 0))).unwrap();
        let entry = reader.single_entry().unwrap().clone();
        assert_eq!(entry.compression_method, CompressionMethod::Unsupported(14));
        assert!(matches!(
            reader.into_entry_reader(&entry).err(),
            Some(ArchiveError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn last_modified_survives() {
        let bytes = archive("t", b"x");
        let reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();
        let entry = reader.single_entry().unwrap();
        assert!(entry.last_modified.is_some());
        assert_eq!(entry.unix_mode, Some(0o100644));
    }
}
