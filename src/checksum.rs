//! Helper module to verify a CRC32 checksum while streaming an entry out.
//!
//! Adapted from zip-rs:
//! <https://github.com/mvdnes/zip-rs/commit/b3c836d9c32efa120cdd5366280f940d3c3b985c>

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Reader that validates the CRC32 and length when it reaches the EOF.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    bytes_read: u64,
    expected_checksum: u32,
    expected_len: u64,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected_checksum: u32, expected_len: u64) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            bytes_read: 0,
            expected_checksum,
            expected_len,
        }
    }

    fn verify(&self) -> io::Result<()> {
        if self.bytes_read != self.expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Entry was {} bytes, expected {}",
                    self.bytes_read, self.expected_len
                ),
            ));
        }
        if self.hasher.clone().finalize() != self.expected_checksum {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Invalid checksum"));
        }
        Ok(())
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.verify()?;
        }
        self.hasher.update(&buf[..count]);
        self.bytes_read += count as u64;
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_reader() {
        let data: &[u8] = b"";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0, 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let mut reader = Crc32Reader::new(data, 1, 0);
        assert!(reader
            .read(&mut buf)
            .unwrap_err()
            .to_string()
            .contains("Invalid checksum"));
    }

    #[test]
    fn byte_by_byte() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0x9be3e0a3, 4);
        for _ in 0..4 {
            assert_eq!(reader.read(&mut buf).unwrap(), 1);
        }
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        // Can keep reading 0 bytes after the end
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn zero_length_reads_skip_verification() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 5];

        let mut reader = Crc32Reader::new(data, 0x9be3e0a3, 4);
        assert_eq!(reader.read(&mut buf[..0]).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
    }

    #[test]
    fn short_entry_is_an_error() {
        let data: &[u8] = b"1234";
        let mut reader = Crc32Reader::new(data, 0x9be3e0a3, 5);
        let mut sink = Vec::new();
        let err = reader.read_to_end(&mut sink).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("expected 5"));
    }
}
