use crate::result::*;

/// A checked cast from u64 to usize
///
/// Lengths read out of archives and receipts are 64-bit,
/// but buffers are sized with usize.
pub fn usize<I: Into<u64>>(i: I) -> ZipSplitResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipSplitError::InsufficientAddressSpace)
}
