//! Error types and the related `Result<T>`

use thiserror::Error;

use crate::name::NameRejection;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// No upload was handed to the archiver.
    #[error("No file was supplied")]
    MissingInput,

    /// The declared name of an upload can't be used as a file name.
    #[error("Rejected file name: {0}")]
    InvalidName(#[from] NameRejection),

    /// An archive with this name exists and the collision policy forbids replacing it.
    #[error("An archive named {0} already exists")]
    AlreadyExists(String),

    /// An error from underlying I/O while creating or reading an archive.
    /// Any partially written archive has been removed by the time this is returned.
    #[error("Storage failure")]
    Storage(#[from] std::io::Error),

    /// The caller cancelled an in-flight archive.
    #[error("Archive creation was cancelled")]
    Cancelled,

    /// No archive exists under the requested name.
    #[error("No archive named {0}")]
    NotFound(String),

    /// The identifier didn't decode, or would resolve outside the archive root.
    #[error("Invalid archive identifier {0:?}")]
    InvalidIdentifier(String),

    /// The store was configured with an unusable root or option.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The ZIP archive contained invalid data.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A cast from a 64-bit int to a usize failed, probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

/// Coarse classification of an [`ArchiveError`],
/// for transports that map failures onto response codes.
///
/// [`ArchiveError`]: enum.ArchiveError.html
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself was bad (client error).
    Rejected,
    /// The requested archive doesn't exist.
    NotFound,
    /// Something went wrong on our end (server error).
    Internal,
}

impl ArchiveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ArchiveError::MissingInput
            | ArchiveError::InvalidName(_)
            | ArchiveError::AlreadyExists(_)
            | ArchiveError::Cancelled
            | ArchiveError::InvalidIdentifier(_) => ErrorClass::Rejected,
            ArchiveError::NotFound(_) => ErrorClass::NotFound,
            ArchiveError::Storage(_)
            | ArchiveError::Config(_)
            | ArchiveError::InvalidArchive(_)
            | ArchiveError::UnsupportedArchive(_)
            | ArchiveError::Encoding(_)
            | ArchiveError::InsufficientAddressSpace => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn not_found_and_invalid_are_distinct() {
        let missing = ArchiveError::NotFound(String::from("a.zip"));
        let hostile = ArchiveError::InvalidIdentifier(String::from("../a.zip"));
        assert_eq!(missing.class(), ErrorClass::NotFound);
        assert_eq!(hostile.class(), ErrorClass::Rejected);
    }

    #[test]
    fn storage_is_internal() {
        let err: ArchiveError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert_eq!(err.class(), ErrorClass::Internal);
        assert_eq!(ArchiveError::MissingInput.class(), ErrorClass::Rejected);
    }
}
