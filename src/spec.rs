//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`write`] and [`read`] modules.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`write`]: ../write/index.html
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::borrow::Cow;
use std::convert::TryInto;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use codepage_437::*;
use memchr::memmem;

use crate::read::{CompressionMethod, EntryMetadata};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number
const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// Header ID of the Zip64 extended information extra field
const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// Sizes and offsets at or above this need Zip64 records.
pub const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Version needed to extract a DEFLATEd file (2.0)
pub const VERSION_DEFLATE: u16 = 20;
/// Version needed to extract a file using Zip64 extensions (4.5)
pub const VERSION_ZIP64: u16 = 45;
/// "Version made by": Unix (3) in the upper byte, spec version 4.5 in the lower.
pub const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_ZIP64;

/// Bit 1: with DEFLATE, bits 1-2 = `10` means maximum compression was used.
pub const FLAG_MAXIMUM_COMPRESSION: u16 = 1 << 1;
/// Bit 3: CRC and sizes are zero in the local header
/// and follow the file data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Bit 11: file name is UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Regular file, rw-r--r--, in the upper half of the external attributes.
pub const UNIX_FILE_ATTRIBUTES: u32 = 0o100644 << 16;

impl CompressionMethod {
    pub(crate) fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub(crate) fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// True if the entry's external attributes hold Unix mode bits.
fn made_on_unix(source_version: u16) -> bool {
    // 4.4.2.1 The upper byte indicates the compatibility of the file
    // attribute information. [...]
    //
    // 4.4.2.2 The current mappings are:
    //
    //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
    //  3 - UNIX
    //  (others omitted)
    source_version >> 8 == 3
}

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Fails with `what` unless `input` holds at least `len` bytes.
fn ensure_len(input: &[u8], len: usize, what: &'static str) -> ArchiveResult<()> {
    if input.len() < len {
        Err(ArchiveError::InvalidArchive(what))
    } else {
        Ok(())
    }
}

/// Saturates a 64-bit size into its 32-bit field,
/// where 0xFFFFFFFF means "see the Zip64 extra field".
fn clamp_u32(v: u64) -> u32 {
    if v >= ZIP64_THRESHOLD {
        u32::MAX
    } else {
        v as u32
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    pub const SIZE_IN_FILE: usize = 22;

    pub fn parse(mut eocdr: &[u8]) -> ArchiveResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        ensure_len(
            eocdr,
            Self::SIZE_IN_FILE,
            "Truncated End Of Central Directory Record",
        )?;
        if eocdr[..4] != EOCDR_MAGIC {
            return Err(ArchiveError::InvalidArchive(
                "Invalid End Of Central Directory Record",
            ));
        }
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        // The comment is ignored; we never write one.
        let _comment_length = read_u16(&mut eocdr);

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&EOCDR_MAGIC);
        put_u16(out, self.disk_number);
        put_u16(out, self.disk_with_central_directory);
        put_u16(out, self.entries_on_this_disk);
        put_u16(out, self.entries);
        put_u32(out, self.central_directory_size);
        put_u32(out, self.central_directory_offset);
        put_u16(out, 0); // No comment
    }
}

/// Searches backward through `tail` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
/// The magic can also turn up inside the record's own size and offset fields,
/// so a match only counts if its comment runs exactly to the end of `tail`.
pub fn find_eocdr(tail: &[u8]) -> ArchiveResult<usize> {
    memmem::rfind_iter(tail, &EOCDR_MAGIC)
        .find(|&posit| {
            let comment_length_at = posit + EndOfCentralDirectory::SIZE_IN_FILE - 2;
            match tail.get(comment_length_at..comment_length_at + 2) {
                Some(mut field) => {
                    let comment_length = read_u16(&mut field) as usize;
                    posit + EndOfCentralDirectory::SIZE_IN_FILE + comment_length == tail.len()
                }
                None => false,
            }
        })
        .ok_or(ArchiveError::InvalidArchive(
            "Couldn't find End Of Central Directory Record",
        ))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE_IN_FILE: usize = 20;

    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::SIZE_IN_FILE || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let disks = read_u32(&mut mapping);

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EOCDR_LOCATOR_MAGIC);
        put_u32(out, self.disk_with_central_directory);
        put_u64(out, self.zip64_eocdr_offset);
        put_u32(out, self.disks);
    }
}

/// Data from the Zip64 end of central directory record
///
/// Precedes the locator on Zip64 files and holds 64-bit versions of the
/// End of central directory record's counts, sizes, and offsets.
#[derive(Debug, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Size of the fixed fields; we never write an extensible data sector.
    pub const SIZE_IN_FILE: usize = 56;

    pub fn parse(mut eocdr: &[u8]) -> ArchiveResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        ensure_len(
            eocdr,
            Self::SIZE_IN_FILE,
            "Truncated Zip64 End Of Central Directory Record",
        )?;
        if eocdr[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ArchiveError::InvalidArchive(
                "Couldn't find zip64 End Of Central Directory Record",
            ));
        }
        eocdr = &eocdr[4..];
        let eocdr_size = read_u64(&mut eocdr);
        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        if eocdr_size < (Self::SIZE_IN_FILE - 12) as u64 {
            return Err(ArchiveError::InvalidArchive(
                "Invalid size in Zip64 End Of Central Directory Record",
            ));
        }
        let source_version = read_u16(&mut eocdr);
        let minimum_extract_version = read_u16(&mut eocdr);
        let disk_number = read_u32(&mut eocdr);
        let disk_with_central_directory = read_u32(&mut eocdr);
        let entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EOCDR_MAGIC);
        put_u64(out, (Self::SIZE_IN_FILE - 12) as u64);
        put_u16(out, self.source_version);
        put_u16(out, self.minimum_extract_version);
        put_u32(out, self.disk_number);
        put_u32(out, self.disk_with_central_directory);
        put_u64(out, self.entries_on_this_disk);
        put_u64(out, self.entries);
        put_u64(out, self.central_directory_size);
        put_u64(out, self.central_directory_offset);
    }
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file
/// stored in the ZIP archive.
/// Sizes and the offset are held at full width here;
/// [`write()`](#method.write) and the extra field parser deal with the
/// 32-bit fields and Zip64 extension.
#[derive(Debug, PartialEq, Eq)]
pub struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u64,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    const FIXED_SIZE_IN_FILE: usize = 46;

    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ArchiveResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        ensure_len(
            entry,
            Self::FIXED_SIZE_IN_FILE,
            "Truncated central directory entry",
        )?;
        if entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ArchiveError::InvalidArchive(
                "Invalid central directory entry",
            ));
        }
        *entry = &entry[4..];
        let source_version = read_u16(entry);
        let minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size = read_u32(entry) as u64;
        let uncompressed_size = read_u32(entry) as u64;
        let path_length = read_u16(entry) as usize;
        let extra_field_length = read_u16(entry) as usize;
        let file_comment_length = read_u16(entry) as usize;
        let disk_number = read_u16(entry);
        let internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset = read_u32(entry) as u64;
        ensure_len(
            entry,
            path_length + extra_field_length + file_comment_length,
            "Truncated central directory entry",
        )?;
        let (path, remaining) = entry.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let (_file_comment, remaining) = remaining.split_at(file_comment_length);
        *entry = remaining;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
        })
    }

    /// Does this entry need a Zip64 extra field?
    pub fn needs_zip64(&self) -> bool {
        self.uncompressed_size >= ZIP64_THRESHOLD
            || self.compressed_size >= ZIP64_THRESHOLD
            || self.header_offset >= ZIP64_THRESHOLD
    }

    /// Serializes the entry. `extra_field` is ignored;
    /// a Zip64 extra field is generated if any size or the offset needs one.
    pub fn write(&self, out: &mut Vec<u8>) {
        let zip64 = zip64_extra_field(
            self.uncompressed_size,
            self.compressed_size,
            self.header_offset,
        );
        out.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        put_u16(out, self.source_version);
        put_u16(out, self.minimum_extract_version);
        put_u16(out, self.flags);
        put_u16(out, self.compression_method);
        put_u16(out, self.last_modified_time);
        put_u16(out, self.last_modified_date);
        put_u32(out, self.crc32);
        put_u32(out, clamp_u32(self.compressed_size));
        put_u32(out, clamp_u32(self.uncompressed_size));
        put_u16(out, self.path.len() as u16);
        put_u16(out, zip64.len() as u16);
        put_u16(out, 0); // No comment
        put_u16(out, self.disk_number);
        put_u16(out, self.internal_file_attributes);
        put_u32(out, self.external_file_attributes);
        put_u32(out, clamp_u32(self.header_offset));
        out.extend_from_slice(self.path);
        out.extend_from_slice(&zip64);
    }
}

/// Builds the Zip64 extended information extra field
/// (or nothing, if every value fits in 32 bits).
///
/// 4.5.3 -Zip64 Extended Information Extra Field (0x0001):
/// The order of the fields in the zip64 extended
/// information record is fixed, but the fields MUST
/// only appear if the corresponding Local or Central
/// directory record field is set to 0xFFFF or 0xFFFFFFFF.
fn zip64_extra_field(uncompressed_size: u64, compressed_size: u64, header_offset: u64) -> Vec<u8> {
    let mut values = Vec::with_capacity(3);
    for v in [uncompressed_size, compressed_size, header_offset] {
        if v >= ZIP64_THRESHOLD {
            values.push(v);
        }
    }
    let mut field = Vec::new();
    if values.is_empty() {
        return field;
    }
    put_u16(&mut field, ZIP64_EXTRA_FIELD_ID);
    put_u16(&mut field, (values.len() * 8) as u16);
    for v in values {
        put_u64(&mut field, v);
    }
    field
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & FLAG_UTF8 != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Decodes an entry name according to the UTF-8 flag.
pub(crate) fn decode_name(raw: &[u8], flags: u16) -> ArchiveResult<String> {
    if is_utf8(flags) {
        Ok(std::str::from_utf8(raw)?.to_owned())
    } else {
        let name: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        Ok(name.into_owned())
    }
}

impl EntryMetadata {
    /// Extracts `EntryMetadata` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry) -> ArchiveResult<Self> {
        let name = decode_name(cde.path, cde.flags)?;

        if cde.disk_number != 0 {
            return Err(ArchiveError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                name, cde.disk_number,
            )));
        }

        let unix_mode = if made_on_unix(cde.source_version) {
            Some((cde.external_file_attributes >> 16) as u16)
        } else {
            None
        };

        let mut metadata = Self {
            name,
            size: cde.uncompressed_size,
            compressed_size: cde.compressed_size,
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            crc32: cde.crc32,
            encrypted: is_encrypted(cde.flags),
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            unix_mode,
            header_offset: cde.header_offset,
        };

        parse_extra_field(&mut metadata, cde.extra_field)?;

        Ok(metadata)
    }
}

/// Converts a DOS time and date pair into a timestamp,
/// or `None` if the fields don't form a real date.
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Converts a timestamp into a DOS `(time, date)` pair.
///
/// DOS dates start in 1980 and end in 2107; anything outside that is clamped.
pub fn to_msdos(when: &NaiveDateTime) -> (u16, u16) {
    if when.year() < 1980 {
        // 1980-01-01 00:00:00
        return (0, (1 << 5) | 1);
    }
    if when.year() > 2107 {
        // 2107-12-31 23:59:58
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }
    let time = ((when.hour() as u16) << 11)
        | ((when.minute() as u16) << 5)
        | (when.second() as u16 / 2);
    let date = (((when.year() - 1980) as u16) << 9)
        | ((when.month() as u16) << 5)
        | when.day() as u16;
    (time, date)
}

/// Parses the "extra fields" found in central directory entries.
///
/// Currently we just look for Zip64 info (64-bit values for files > 2^32 in size)
fn parse_extra_field(metadata: &mut EntryMetadata, mut extra_field: &[u8]) -> ArchiveResult<()> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    while !extra_field.is_empty() {
        ensure_len(extra_field, 4, "Truncated extra field header")?;
        let kind = read_u16(&mut extra_field);
        let field_len = read_u16(&mut extra_field) as usize;
        ensure_len(extra_field, field_len, "Truncated extra field")?;
        let (mut field, rest) = extra_field.split_at(field_len);
        extra_field = rest;

        // Zip64 extended information extra field
        if kind == ZIP64_EXTRA_FIELD_ID {
            if metadata.size == ZIP64_THRESHOLD {
                ensure_len(field, 8, "Zip64 extra field is missing the size")?;
                metadata.size = read_u64(&mut field);
            }
            if metadata.compressed_size == ZIP64_THRESHOLD {
                ensure_len(field, 8, "Zip64 extra field is missing the compressed size")?;
                metadata.compressed_size = read_u64(&mut field);
            }
            if metadata.header_offset == ZIP64_THRESHOLD {
                ensure_len(field, 8, "Zip64 extra field is missing the header offset")?;
                metadata.header_offset = read_u64(&mut field);
            }
            // Anything left over would be a disk number,
            // and we already checked many times that this isn't a multi-disk archive.
            if !field.is_empty() {
                return Err(ArchiveError::InvalidArchive(
                    "Extra data field contains disk number",
                ));
            }
        }
    }
    Ok(())
}

/// Data from a local file header
///
/// Each file's actual contents is preceded by this header.
/// We write these with bit 3 set, so the CRC and sizes are zeroed
/// and show up after the data in a data descriptor.
#[derive(Debug, PartialEq, Eq)]
pub struct LocalFileHeader<'a> {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    pub const FIXED_SIZE_IN_FILE: usize = 30;

    /// Given the fixed-size part of a local header,
    /// returns the length of the variable-size part (name + extra field) after it.
    pub fn variable_len(fixed: &[u8]) -> ArchiveResult<usize> {
        ensure_len(fixed, Self::FIXED_SIZE_IN_FILE, "Truncated local file header")?;
        let mut lengths = &fixed[26..30];
        let path_length = read_u16(&mut lengths) as usize;
        let extra_field_length = read_u16(&mut lengths) as usize;
        Ok(path_length + extra_field_length)
    }

    pub fn parse_and_consume(header: &mut &'a [u8]) -> ArchiveResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        ensure_len(header, Self::FIXED_SIZE_IN_FILE, "Truncated local file header")?;
        if header[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ArchiveError::InvalidArchive("Invalid local file header"));
        }
        *header = &header[4..];
        let minimum_extract_version = read_u16(header);
        let flags = read_u16(header);
        let compression_method = read_u16(header);
        let last_modified_time = read_u16(header);
        let last_modified_date = read_u16(header);
        let crc32 = read_u32(header);
        let compressed_size = read_u32(header);
        let uncompressed_size = read_u32(header);
        let path_length = read_u16(header) as usize;
        let extra_field_length = read_u16(header) as usize;
        ensure_len(
            header,
            path_length + extra_field_length,
            "Truncated local file header",
        )?;
        let (path, remaining) = header.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        *header = remaining;

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        put_u16(out, self.minimum_extract_version);
        put_u16(out, self.flags);
        put_u16(out, self.compression_method);
        put_u16(out, self.last_modified_time);
        put_u16(out, self.last_modified_date);
        put_u32(out, self.crc32);
        put_u32(out, self.compressed_size);
        put_u32(out, self.uncompressed_size);
        put_u16(out, self.path.len() as u16);
        put_u16(out, self.extra_field.len() as u16);
        out.extend_from_slice(self.path);
        out.extend_from_slice(self.extra_field);
    }
}

/// The data descriptor following an entry's compressed bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub fn write(&self, out: &mut Vec<u8>) {
        // 4.3.9  Data descriptor:
        //
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //
        // 4.3.9.2 [...] compressed and uncompressed sizes SHOULD be stored in
        // ZIP64 format (as 8 byte values) when a file's size exceeds 0xFFFFFFFF.
        //
        // 4.3.9.3 Although not originally assigned a signature, the value
        // 0x08074b50 has commonly been adopted as a signature value.
        out.extend_from_slice(&DATA_DESCRIPTOR_MAGIC);
        put_u32(out, self.crc32);
        if self.is_zip64() {
            put_u64(out, self.compressed_size);
            put_u64(out, self.uncompressed_size);
        } else {
            put_u32(out, self.compressed_size as u32);
            put_u32(out, self.uncompressed_size as u32);
        }
    }

    pub fn is_zip64(&self) -> bool {
        self.compressed_size >= ZIP64_THRESHOLD || self.uncompressed_size >= ZIP64_THRESHOLD
    }
}
