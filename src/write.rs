//! Tools for writing a single-entry ZIP archive as a stream.
//!
//! [`EntryWriter`] never needs to seek and never holds more than the
//! DEFLATE window and whatever the caller hands it in one `write()`.
//! The local header goes out first with its CRC and sizes zeroed
//! (general purpose bit 3), the entry's compressed bytes follow,
//! and [`EntryWriter::finish()`] appends the data descriptor,
//! central directory, and end records.
//!
//! [`EntryWriter`]: struct.EntryWriter.html
//! [`EntryWriter::finish()`]: struct.EntryWriter.html#method.finish

use std::io::{self, Write};

use chrono::NaiveDateTime;
use crc32fast::Hasher;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::read::CompressionMethod;
use crate::spec;

/// Passes bytes through to `inner`, counting them along the way.
/// Gives us offsets without needing `Seek`.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// What was written, returned by [`EntryWriter::finish()`].
///
/// [`EntryWriter::finish()`]: struct.EntryWriter.html#method.finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    /// Uncompressed size of the entry in bytes
    pub size: u64,
    /// Compressed size of the entry in bytes
    pub compressed_size: u64,
    /// CRC-32 of the uncompressed entry
    pub crc32: u32,
    /// Size of the whole archive in bytes
    pub archive_size: u64,
}

/// Streams one named entry into a ZIP archive.
///
/// Write the entry's bytes with the `Write` impl, then call [`finish()`].
/// Dropping the writer without finishing leaves a truncated archive behind in `W`;
/// callers writing to files are expected to throw those away.
///
/// [`finish()`]: #method.finish
pub struct EntryWriter<W: Write> {
    encoder: DeflateEncoder<CountingWriter<W>>,
    hasher: Hasher,
    size: u64,
    name: String,
    flags: u16,
    dos_time: u16,
    dos_date: u16,
    data_start: u64,
}

impl<W: Write> EntryWriter<W> {
    /// Starts an archive in `inner` holding a single entry named `name`,
    /// DEFLATEd at `level` (0-9).
    pub fn new(inner: W, name: &str, level: u32, modified: &NaiveDateTime) -> io::Result<Self> {
        if name.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Entry name is too long for a ZIP header",
            ));
        }

        let mut flags = spec::FLAG_DATA_DESCRIPTOR | spec::FLAG_UTF8;
        if level >= 8 {
            flags |= spec::FLAG_MAXIMUM_COMPRESSION;
        }
        let (dos_time, dos_date) = spec::to_msdos(modified);

        let header = spec::LocalFileHeader {
            minimum_extract_version: spec::VERSION_DEFLATE,
            flags,
            compression_method: CompressionMethod::Deflate.as_u16(),
            last_modified_time: dos_time,
            last_modified_date: dos_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            path: name.as_bytes(),
            extra_field: &[],
        };
        trace!("{:?}", header);
        let mut record = Vec::with_capacity(spec::LocalFileHeader::FIXED_SIZE_IN_FILE + name.len());
        header.write(&mut record);

        let mut counter = CountingWriter { inner, count: 0 };
        counter.write_all(&record)?;
        let data_start = counter.count;

        Ok(Self {
            encoder: DeflateEncoder::new(counter, Compression::new(level)),
            hasher: Hasher::new(),
            size: 0,
            name: name.to_owned(),
            flags,
            dos_time,
            dos_date,
            data_start,
        })
    }

    /// Bytes of entry data written so far (uncompressed).
    pub fn bytes_written(&self) -> u64 {
        self.size
    }

    /// Flushes the compressed stream and writes the archive's trailing records.
    /// Returns the underlying writer, which has been flushed.
    pub fn finish(self) -> io::Result<(W, EntrySummary)> {
        let mut counter = self.encoder.finish()?;
        let compressed_size = counter.count - self.data_start;
        let crc32 = self.hasher.finalize();

        let descriptor = spec::DataDescriptor {
            crc32,
            compressed_size,
            uncompressed_size: self.size,
        };
        trace!("{:?}", descriptor);
        let mut record = Vec::new();
        descriptor.write(&mut record);
        counter.write_all(&record)?;

        let central_directory_offset = counter.count;
        let entry = spec::CentralDirectoryEntry {
            source_version: spec::VERSION_MADE_BY,
            minimum_extract_version: if descriptor.is_zip64() {
                spec::VERSION_ZIP64
            } else {
                spec::VERSION_DEFLATE
            },
            flags: self.flags,
            compression_method: CompressionMethod::Deflate.as_u16(),
            last_modified_time: self.dos_time,
            last_modified_date: self.dos_date,
            crc32,
            compressed_size,
            uncompressed_size: self.size,
            disk_number: 0,
            internal_file_attributes: 0,
            external_file_attributes: spec::UNIX_FILE_ATTRIBUTES,
            header_offset: 0,
            path: self.name.as_bytes(),
            extra_field: &[],
        };
        trace!("{:?}", entry);
        record.clear();
        entry.write(&mut record);
        let central_directory_size = record.len() as u64;

        let end_offset = central_directory_offset + central_directory_size;
        if entry.needs_zip64() || central_directory_offset >= spec::ZIP64_THRESHOLD {
            debug!("Writing Zip64 end records for {}", self.name);
            spec::Zip64EndOfCentralDirectory {
                source_version: spec::VERSION_MADE_BY,
                minimum_extract_version: spec::VERSION_ZIP64,
                disk_number: 0,
                disk_with_central_directory: 0,
                entries_on_this_disk: 1,
                entries: 1,
                central_directory_size,
                central_directory_offset,
            }
            .write(&mut record);
            spec::Zip64EndOfCentralDirectoryLocator {
                disk_with_central_directory: 0,
                zip64_eocdr_offset: end_offset,
                disks: 1,
            }
            .write(&mut record);
        }

        spec::EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 1,
            entries: 1,
            central_directory_size: central_directory_size as u32,
            central_directory_offset: if central_directory_offset >= spec::ZIP64_THRESHOLD {
                u32::MAX
            } else {
                central_directory_offset as u32
            },
        }
        .write(&mut record);
        counter.write_all(&record)?;
        counter.flush()?;

        let summary = EntrySummary {
            size: self.size,
            compressed_size,
            crc32,
            archive_size: counter.count,
        };
        debug!("Finished {}: {:?}", self.name, summary);
        Ok((counter.inner, summary))
    }
}

impl<W: Write> Write for EntryWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.encoder.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}
