//! Splitting archives into receipts and chunks, and putting them back together
//!
//! Splitting walks the archive front to back exactly once (after hashing it).
//! Every entry whose compressed data is at least [`DEDUP_THRESHOLD`] bytes
//! goes to the chunk store; everything else (local headers, small entries,
//! the central directory...) is copied into the receipt as-is.
//! Restoring plays the receipt's records back in order.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use camino::Utf8Path;
use log::*;

use crate::read::{EntryMetadata, ZipArchive};
use crate::receipt::*;
use crate::result::*;
use crate::store::{ChunkStore, ChunkStoreEstimator};
use crate::util::{hash_exact, Hash, HashingWriter};

/// Entries with at least this much compressed data are deduplicated.
pub const DEDUP_THRESHOLD: u64 = 64 * 1024;

/// What a split did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    /// Size of the original archive
    pub source_size: u64,
    /// SHA-256 of the original archive
    pub source_hash: Hash,
    /// Archive bytes copied into the receipt
    pub inline_bytes: u64,
    /// Archive bytes referenced from the chunk store
    pub shared_bytes: u64,
    /// Number of shared chunk records
    pub shared_chunks: u64,
    /// Bytes of chunks the store didn't already have
    pub new_chunk_bytes: u64,
    /// Size of the receipt
    pub receipt_size: u64,
}

impl SplitSummary {
    /// How much smaller the receipt and new chunks are than the original
    pub fn saved_bytes(&self) -> u64 {
        self.source_size
            .saturating_sub(self.receipt_size + self.new_chunk_bytes)
    }
}

/// Returns the entries worth deduplicating, sorted by where they start in the archive.
pub fn dedup_candidates<R: Read + Seek>(
    archive: &ZipArchive,
    reader: &mut R,
) -> ZipSplitResult<Vec<EntryMetadata>> {
    let mut candidates = Vec::new();
    for entry in archive.entries(reader) {
        let entry = entry?;
        if entry.compressed_size < DEDUP_THRESHOLD {
            continue;
        }
        debug!(
            "{} ({} bytes at {}) is a dedup candidate",
            entry.name, entry.compressed_size, entry.header_offset
        );
        candidates.push(entry);
    }
    candidates.sort_by_key(|e| e.header_offset);
    Ok(candidates)
}

/// Copies the next `len` bytes of `source` into `sink` as one inline chunk.
fn inline_span<R, S>(source: &mut R, sink: &mut S, len: u64) -> ZipSplitResult<()>
where
    R: Read + Seek,
    S: ReceiptSink,
{
    if len == 0 {
        return Ok(());
    }
    sink.start_inline_chunk(len)?;
    sink.record_raw_span(source, len)
}

/// Splits the archive read from `source` into `sink` and `store`.
///
/// `container_name` is recorded in the store as where each chunk came from.
/// Nothing is flushed: the caller must [`flush()`](../store/trait.ChunkStore.html#tymethod.flush)
/// the store before trusting the receipt.
pub fn split_archive<R, S, C>(
    source: &mut R,
    container_name: &str,
    sink: &mut S,
    store: &mut C,
) -> ZipSplitResult<SplitSummary>
where
    R: Read + Seek,
    S: ReceiptSink,
    C: ChunkStore + ?Sized,
{
    let archive = ZipArchive::new(source)?;
    let candidates = dedup_candidates(&archive, source)?;
    let archive_len = archive.archive_len();
    let added_before = store.added_bytes();

    source.seek(SeekFrom::Start(0))?;
    let source_hash = hash_exact(source, archive_len)?;
    sink.write_header(&source_hash, archive_len)?;

    let mut summary = SplitSummary {
        source_size: archive_len,
        source_hash,
        ..Default::default()
    };

    source.seek(SeekFrom::Start(0))?;
    let mut position = 0u64;
    for candidate in &candidates {
        let offset = candidate.header_offset;
        if position > offset {
            return Err(ZipSplitError::LayoutMismatch { position, offset });
        }
        if offset >= archive_len {
            return Err(ZipSplitError::InvalidArchive(
                "Local header offset is past the end of the archive",
            ));
        }

        // Everything up to this entry goes in as-is.
        inline_span(source, sink, offset - position)?;
        summary.inline_bytes += offset - position;

        // Local headers are almost always unique (timestamps, names),
        // so they stay inline even when the data after them is shared.
        let local = ZipArchive::read_local_header(source, offset)?;
        let mut name = vec![0u8; local.name_length() as usize];
        source.read_exact(&mut name).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                ZipSplitError::InvalidArchive("Truncated local file header name")
            }
            _ => e.into(),
        })?;
        if cfg!(feature = "check-local-metadata") && name != candidate.raw_name {
            warn!(
                "Local header at {} names {:?}, but the central directory says {:?}",
                offset,
                String::from_utf8_lossy(&name),
                candidate.name
            );
        }

        let header_len = local.size_in_file();
        sink.start_inline_chunk(header_len)?;
        sink.write_inline_bytes(local.fixed_bytes())?;
        sink.write_inline_bytes(&name)?;
        sink.record_raw_span(source, local.extra_field_length() as u64)
            .map_err(|e| match e {
                ZipSplitError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    ZipSplitError::InvalidArchive("Truncated local file header")
                }
                e => e,
            })?;
        summary.inline_bytes += header_len;

        let data_start = offset + header_len;
        let data_len = candidate.compressed_size;
        if data_start
            .checked_add(data_len)
            .map_or(true, |end| end > archive_len)
        {
            return Err(ZipSplitError::InvalidArchive(
                "Entry data runs past the end of the archive",
            ));
        }

        let hash = hash_exact(source, data_len)?;
        source.seek(SeekFrom::Start(data_start))?;
        store.add_chunk(&hash, source, data_len, container_name, &candidate.name)?;
        source.seek(SeekFrom::Start(data_start + data_len))?;
        sink.write_shared_chunk(&hash)?;
        debug!(
            "{}: {} bytes shared as {}",
            candidate.name,
            data_len,
            hex::encode_upper(hash)
        );

        summary.shared_bytes += data_len;
        summary.shared_chunks += 1;
        position = data_start + data_len;
    }

    // The rest: trailing entries, the central directory, the EOCDR...
    inline_span(source, sink, archive_len - position)?;
    summary.inline_bytes += archive_len - position;

    summary.new_chunk_bytes = store.added_bytes() - added_before;
    summary.receipt_size = sink.size();
    info!(
        "Split {}: {} bytes, {} shared in {} chunks ({} new), receipt is {} bytes",
        container_name,
        summary.source_size,
        summary.shared_bytes,
        summary.shared_chunks,
        summary.new_chunk_bytes,
        summary.receipt_size
    );
    Ok(summary)
}

/// Splits the archive at `path`, recording the path as each chunk's container.
pub fn split_file<S, C>(
    path: &Utf8Path,
    sink: &mut S,
    store: &mut C,
) -> ZipSplitResult<SplitSummary>
where
    S: ReceiptSink,
    C: ChunkStore + ?Sized,
{
    let mut source = File::open(path)?;
    split_archive(&mut source, path.as_str(), sink, store)
}

/// Works out what splitting the archive at `path` would produce,
/// without writing anything.
///
/// Reuse `store` across archives to account for chunks they share.
pub fn estimate_file(
    path: &Utf8Path,
    store: &mut ChunkStoreEstimator,
) -> ZipSplitResult<SplitSummary> {
    let mut receipt = ReceiptEstimator::new();
    split_file(path, &mut receipt, store)
}

/// Outputs that can be grown to their final size up front
pub trait Presize {
    fn presize(&mut self, len: u64) -> io::Result<()>;
}

impl Presize for File {
    fn presize(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Presize for Vec<u8> {
    fn presize(&mut self, len: u64) -> io::Result<()> {
        let len =
            usize::try_from(len).map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
        self.reserve(len.saturating_sub(self.len()));
        Ok(())
    }
}

impl Presize for io::Cursor<Vec<u8>> {
    fn presize(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().presize(len)
    }
}

impl Presize for io::Sink {
    fn presize(&mut self, _len: u64) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Presize + ?Sized> Presize for &mut W {
    fn presize(&mut self, len: u64) -> io::Result<()> {
        (**self).presize(len)
    }
}

impl<W: Presize + Write> Presize for HashingWriter<W> {
    fn presize(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().presize(len)
    }
}

/// Rebuilds the original archive from a receipt, writing it to `output`.
///
/// Returns the receipt's header, whose hash the caller should compare
/// against the hash of what was actually written.
/// (See [`restore_verified()`] for a version that does so.)
pub fn restore<R, C, W>(
    receipt: &mut ReceiptReader<R>,
    store: &C,
    output: &mut W,
    presize: bool,
) -> ZipSplitResult<ReceiptHeader>
where
    R: Read,
    C: ChunkStore + ?Sized,
    W: Write + Presize,
{
    let header = receipt.read_header()?;
    if presize {
        output.presize(header.file_size)?;
    }

    while !receipt.is_eof() {
        match receipt.read_chunk()? {
            ChunkHeader::Inline { len } => receipt.read_inline(len, output)?,
            ChunkHeader::Shared { hash } => {
                let mut chunk = store.open_chunk(&hash)?;
                let copied = io::copy(&mut chunk, output)?;
                trace!("Copied {} bytes from {}", copied, hex::encode_upper(&hash));
            }
        }
    }
    output.flush()?;
    Ok(header)
}

/// Like [`restore()`], but checks what was written against the receipt's hash,
/// failing with [`ZipSplitError::Integrity`] if they differ.
///
/// On a mismatch, `output` still holds everything the receipt produced.
pub fn restore_verified<R, C, W>(
    receipt: &mut ReceiptReader<R>,
    store: &C,
    output: &mut W,
    presize: bool,
) -> ZipSplitResult<ReceiptHeader>
where
    R: Read,
    C: ChunkStore + ?Sized,
    W: Write + Presize,
{
    let mut hashing = HashingWriter::new(output);
    let header = restore(receipt, store, &mut hashing, presize)?;
    let (_, actual) = hashing.finish();
    if header.file_hash != actual {
        return Err(ZipSplitError::Integrity {
            expected: hex::encode_upper(&header.file_hash),
            actual: hex::encode_upper(actual),
        });
    }
    debug!("Restored {} bytes, hash matches", header.file_size);
    Ok(header)
}

/// Restores a receipt into the void, just to check it.
pub fn verify_receipt<R, C>(
    receipt: &mut ReceiptReader<R>,
    store: &C,
) -> ZipSplitResult<ReceiptHeader>
where
    R: Read,
    C: ChunkStore + ?Sized,
{
    restore_verified(receipt, store, &mut io::sink(), false)
}
