//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipSplitResult<T> = Result<T, ZipSplitError>;

/// Coarse classification of a [`ZipSplitError`].
///
/// Callers processing many files usually only care which of these they got:
/// a `Format` error means the input was corrupt,
/// an `Integrity` error means the reconstructed output was.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Integrity,
    StoreAccess,
    Io,
}

#[derive(Debug, Error)]
pub enum ZipSplitError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The ZIP archive contained invalid data per the spec.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// The receipt's signature, version or framing is broken.
    #[error("Invalid receipt: {0}")]
    InvalidReceipt(&'static str),

    /// The receipt contains a chunk record with a type we don't know.
    #[error("Unknown receipt chunk type {0}")]
    UnknownChunkType(u8),

    /// Splitting found the stream already past a local header it needed to visit.
    /// The central directory doesn't describe the container's actual layout.
    #[error("Stream at offset {position} already passed local header at {offset}")]
    LayoutMismatch { position: u64, offset: u64 },

    /// The restored bytes don't hash to what the receipt recorded.
    #[error("Restored content hash {actual} doesn't match recorded hash {expected}")]
    Integrity { expected: String, actual: String },

    /// Another writer holds the chunk store's lock.
    #[error("Chunk store at {0} is locked by another writer")]
    Locked(Utf8PathBuf),

    /// A write was attempted on a store opened read-only.
    #[error("Chunk store was opened read-only")]
    ReadOnly,

    /// A receipt referenced a chunk the store doesn't have.
    #[error("No chunk with hash {0} in the store")]
    MissingChunk(String),

    /// A bucket's index file couldn't be parsed.
    #[error("Corrupt chunk index {0}")]
    CorruptIndex(Utf8PathBuf, #[source] serde_json::Error),

    /// The store only tracks sizes and hashes (e.g., when estimating).
    #[error("Chunk store holds no chunk data")]
    NoChunkData,

    /// A cast from a 64-bit int to a usize failed,
    /// probably on a 32-bit system.
    #[error("Length too large for address space")]
    InsufficientAddressSpace,
}

impl ZipSplitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipSplitError::Io(_) => ErrorKind::Io,
            ZipSplitError::InvalidArchive(_)
            | ZipSplitError::InvalidReceipt(_)
            | ZipSplitError::UnknownChunkType(_)
            | ZipSplitError::LayoutMismatch { .. }
            | ZipSplitError::InsufficientAddressSpace => ErrorKind::Format,
            ZipSplitError::Integrity { .. } => ErrorKind::Integrity,
            ZipSplitError::Locked(_)
            | ZipSplitError::ReadOnly
            | ZipSplitError::MissingChunk(_)
            | ZipSplitError::CorruptIndex(..)
            | ZipSplitError::NoChunkData => ErrorKind::StoreAccess,
        }
    }
}
