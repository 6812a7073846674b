use crate::result::*;

/// A checked cast from u64 to usize, for lengths we're about to allocate.
pub fn usize<I: Into<u64>>(i: I) -> ArchiveResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ArchiveError::InsufficientAddressSpace)
}
