//! The receipt format: what's left of an archive after its big entries
//! move into the chunk store.
//!
//! ```text
//! Header: 'Z' 'i' 'p' 'S' | version: u8 = 1 | hash_len: u8 | hash | original_size: i64
//! Record: type: u8
//!   1 (shared chunk):  hash_len: u8 | hash
//!   2 (short inline):  len: u16 | bytes
//!   3 (long inline):   len: u64 | bytes
//! ...repeated until the end of the stream.
//! ```
//!
//! All integers are little-endian.
//! There is no end marker or padding: the last record ends the file.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::*;

use crate::result::*;
use crate::util::copy_exact;

/// Leading bytes of every receipt
pub const RECEIPT_MAGIC: [u8; 4] = *b"ZipS";
/// The only receipt version we read or write
pub const RECEIPT_VERSION: u8 = 1;

const CHUNK_SHARED: u8 = 1;
const CHUNK_INLINE_SHORT: u8 = 2;
const CHUNK_INLINE_LONG: u8 = 3;

/// The size of a receipt header holding a hash of `hash_len` bytes
pub fn header_size(hash_len: usize) -> u64 {
    (RECEIPT_MAGIC.len() + 1 + 1 + hash_len + 8) as u64
}

/// The size of a shared chunk record for a hash of `hash_len` bytes
pub fn shared_record_size(hash_len: usize) -> u64 {
    (1 + 1 + hash_len) as u64
}

/// The size of an inline record's framing (not its bytes)
pub fn inline_framing_size(len: u64) -> u64 {
    if len > u16::MAX as u64 {
        1 + 8
    } else {
        1 + 2
    }
}

fn hash_len_byte(hash: &[u8]) -> ZipSplitResult<u8> {
    u8::try_from(hash.len())
        .map_err(|_| ZipSplitError::InvalidReceipt("Hash longer than 255 bytes"))
}

/// The start of a receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHeader {
    /// Hash of the original archive
    pub file_hash: Vec<u8>,
    /// Size of the original archive in bytes
    pub file_size: u64,
}

/// One record of a receipt, in playback order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkHeader {
    /// The next `len` bytes of the receipt are archive bytes.
    Inline { len: u64 },
    /// Archive bytes are in the chunk store, under this hash.
    Shared { hash: Vec<u8> },
}

/// Something a split can be written into.
///
/// [`ReceiptWriter`] produces an actual receipt;
/// [`ReceiptEstimator`] just adds up how big it would be.
/// Both account for sizes identically.
pub trait ReceiptSink {
    fn write_header(&mut self, file_hash: &[u8], file_size: u64) -> ZipSplitResult<()>;

    fn write_shared_chunk(&mut self, hash: &[u8]) -> ZipSplitResult<()>;

    /// Starts an inline chunk. Exactly `len` bytes must follow,
    /// via `write_inline_bytes()` or `record_raw_span()`.
    fn start_inline_chunk(&mut self, len: u64) -> ZipSplitResult<()>;

    fn write_inline_bytes(&mut self, bytes: &[u8]) -> ZipSplitResult<()>;

    /// Moves the next `len` bytes of `source` into the current inline chunk,
    /// leaving `source` positioned right after them.
    fn record_raw_span<R: Read + Seek>(&mut self, source: &mut R, len: u64) -> ZipSplitResult<()>;

    /// Bytes of receipt produced so far
    fn size(&self) -> u64;
}

/// Writes a receipt to the given writer.
pub struct ReceiptWriter<W: Write> {
    inner: W,
    size: u64,
}

impl<W: Write> ReceiptWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, size: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn put(&mut self, bytes: &[u8]) -> ZipSplitResult<()> {
        self.inner.write_all(bytes)?;
        self.size += bytes.len() as u64;
        Ok(())
    }
}

impl<W: Write> ReceiptSink for ReceiptWriter<W> {
    fn write_header(&mut self, file_hash: &[u8], file_size: u64) -> ZipSplitResult<()> {
        let hash_len = hash_len_byte(file_hash)?;
        self.put(&RECEIPT_MAGIC)?;
        self.put(&[RECEIPT_VERSION, hash_len])?;
        self.put(file_hash)?;
        self.put(&file_size.to_le_bytes())
    }

    fn write_shared_chunk(&mut self, hash: &[u8]) -> ZipSplitResult<()> {
        let hash_len = hash_len_byte(hash)?;
        self.put(&[CHUNK_SHARED, hash_len])?;
        self.put(hash)
    }

    fn start_inline_chunk(&mut self, len: u64) -> ZipSplitResult<()> {
        if len > u16::MAX as u64 {
            self.put(&[CHUNK_INLINE_LONG])?;
            self.put(&len.to_le_bytes())
        } else {
            self.put(&[CHUNK_INLINE_SHORT])?;
            self.put(&(len as u16).to_le_bytes())
        }
    }

    fn write_inline_bytes(&mut self, bytes: &[u8]) -> ZipSplitResult<()> {
        self.put(bytes)
    }

    fn record_raw_span<R: Read + Seek>(&mut self, source: &mut R, len: u64) -> ZipSplitResult<()> {
        copy_exact(source, &mut self.inner, len)?;
        self.size += len;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Computes how big a receipt would be without writing anything.
#[derive(Debug, Default, Clone)]
pub struct ReceiptEstimator {
    size: u64,
}

impl ReceiptEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptSink for ReceiptEstimator {
    fn write_header(&mut self, file_hash: &[u8], _file_size: u64) -> ZipSplitResult<()> {
        hash_len_byte(file_hash)?;
        self.size += header_size(file_hash.len());
        Ok(())
    }

    fn write_shared_chunk(&mut self, hash: &[u8]) -> ZipSplitResult<()> {
        hash_len_byte(hash)?;
        self.size += shared_record_size(hash.len());
        Ok(())
    }

    fn start_inline_chunk(&mut self, len: u64) -> ZipSplitResult<()> {
        self.size += inline_framing_size(len);
        Ok(())
    }

    fn write_inline_bytes(&mut self, bytes: &[u8]) -> ZipSplitResult<()> {
        self.size += bytes.len() as u64;
        Ok(())
    }

    fn record_raw_span<R: Read + Seek>(&mut self, source: &mut R, len: u64) -> ZipSplitResult<()> {
        let offset = i64::try_from(len).map_err(|_| ZipSplitError::InsufficientAddressSpace)?;
        source.seek(SeekFrom::Current(offset))?;
        self.size += len;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Reads a receipt, one record at a time.
pub struct ReceiptReader<R> {
    inner: R,
    len: u64,
    position: u64,
}

impl<R: Read + Seek> ReceiptReader<R> {
    /// Wraps a receipt positioned at its first byte.
    pub fn new(mut inner: R) -> ZipSplitResult<Self> {
        let position = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;
        Ok(Self {
            inner,
            len,
            position,
        })
    }
}

impl<R: Read> ReceiptReader<R> {
    fn read_bytes(&mut self, buf: &mut [u8], truncated: &'static str) -> ZipSplitResult<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.position += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ZipSplitError::InvalidReceipt(truncated))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_u8(&mut self, truncated: &'static str) -> ZipSplitResult<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b, truncated)?;
        Ok(b[0])
    }

    fn read_hash(&mut self, truncated: &'static str) -> ZipSplitResult<Vec<u8>> {
        let len = self.read_u8(truncated)?;
        let mut hash = vec![0u8; len as usize];
        self.read_bytes(&mut hash, truncated)?;
        Ok(hash)
    }

    /// Reads and validates the receipt header. Call this first, once.
    pub fn read_header(&mut self) -> ZipSplitResult<ReceiptHeader> {
        const TRUNCATED: &str = "Truncated receipt header";
        let mut magic = [0u8; 4];
        self.read_bytes(&mut magic, TRUNCATED)?;
        if magic != RECEIPT_MAGIC {
            return Err(ZipSplitError::InvalidReceipt("Bad signature"));
        }
        if self.read_u8(TRUNCATED)? != RECEIPT_VERSION {
            return Err(ZipSplitError::InvalidReceipt("Unsupported version"));
        }
        let file_hash = self.read_hash(TRUNCATED)?;
        let mut size = [0u8; 8];
        self.read_bytes(&mut size, TRUNCATED)?;
        let header = ReceiptHeader {
            file_hash,
            file_size: u64::from_le_bytes(size),
        };
        trace!("{:?}", header);
        Ok(header)
    }

    /// True once every record has been read.
    pub fn is_eof(&self) -> bool {
        self.position == self.len
    }

    /// Reads the next record's header.
    ///
    /// After an [`Inline`](enum.ChunkHeader.html#variant.Inline) record,
    /// its bytes must be consumed with [`read_inline()`](#method.read_inline)
    /// before reading the next record.
    pub fn read_chunk(&mut self) -> ZipSplitResult<ChunkHeader> {
        const TRUNCATED: &str = "Truncated chunk record";
        let chunk = match self.read_u8(TRUNCATED)? {
            CHUNK_SHARED => ChunkHeader::Shared {
                hash: self.read_hash(TRUNCATED)?,
            },
            CHUNK_INLINE_SHORT => {
                let mut len = [0u8; 2];
                self.read_bytes(&mut len, TRUNCATED)?;
                ChunkHeader::Inline {
                    len: u16::from_le_bytes(len) as u64,
                }
            }
            CHUNK_INLINE_LONG => {
                let mut len = [0u8; 8];
                self.read_bytes(&mut len, TRUNCATED)?;
                ChunkHeader::Inline {
                    len: u64::from_le_bytes(len),
                }
            }
            other => return Err(ZipSplitError::UnknownChunkType(other)),
        };
        trace!("{:?}", chunk);
        Ok(chunk)
    }

    /// Copies an inline record's `len` bytes to `to`.
    pub fn read_inline<W: Write + ?Sized>(&mut self, len: u64, to: &mut W) -> ZipSplitResult<()> {
        if self.len.saturating_sub(self.position) < len {
            return Err(ZipSplitError::InvalidReceipt(
                "Inline chunk runs past the end of the receipt",
            ));
        }
        copy_exact(&mut self.inner, to, len)?;
        self.position += len;
        Ok(())
    }
}
