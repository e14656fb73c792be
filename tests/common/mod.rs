//! Builds small ZIP archives in memory, so tests don't need a `zip` binary.
//!
//! Every entry is stored (method 0): its data is its compressed data,
//! which makes compressed sizes easy to control.

#![allow(dead_code)]

use std::io::Cursor;

use zipsplit::receipt::{ReceiptReader, ReceiptWriter};
use zipsplit::split::{self, SplitSummary};
use zipsplit::store::ChunkStore;
use zipsplit::ZipSplitResult;

const ZIP64_SENTINEL: u32 = u32::MAX;
/// 1980-01-01, the earliest date ZIP can hold
const DOS_DATE: u16 = (1 << 5) | 1;
const UTF8_FLAG: u16 = 1 << 11;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic bytes that look random enough to never repeat within a test
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    // xorshift64*
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            (state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 56) as u8
        })
        .collect()
}

#[derive(Default)]
pub struct ZipBuilder {
    body: Vec<u8>,
    central: Vec<Vec<u8>>,
    zip64_end: bool,
    comment: Vec<u8>,
    /// Where each entry's local header starts
    pub offsets: Vec<u64>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plain stored entry.
    pub fn stored(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.entry(name, data, false, &[])
    }

    /// Adds a stored entry whose sizes and offset live in Zip64 extra fields,
    /// in both the local header and the central directory.
    pub fn stored_zip64(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.entry(name, data, true, &[])
    }

    /// Adds a stored entry with an extra field in its local header only.
    pub fn stored_with_local_extra(
        &mut self,
        name: &str,
        data: &[u8],
        extra: &[u8],
    ) -> &mut Self {
        self.entry(name, data, false, extra)
    }

    /// Lists entry `index` in the central directory a second time.
    pub fn repeat_central_entry(&mut self, index: usize) -> &mut Self {
        let copy = self.central[index].clone();
        self.central.push(copy);
        self
    }

    /// Ends the archive with Zip64 end of central directory records.
    pub fn zip64_end(&mut self) -> &mut Self {
        self.zip64_end = true;
        self
    }

    pub fn comment(&mut self, comment: &[u8]) -> &mut Self {
        self.comment = comment.to_vec();
        self
    }

    fn entry(&mut self, name: &str, data: &[u8], zip64: bool, local_extra: &[u8]) -> &mut Self {
        let offset = self.body.len() as u64;
        let crc = crc32fast::hash(data);
        let size = data.len() as u64;
        let version: u16 = if zip64 { 45 } else { 20 };

        let mut local_extra = local_extra.to_vec();
        let local_size = if zip64 {
            put_u16(&mut local_extra, 0x0001);
            put_u16(&mut local_extra, 16);
            put_u64(&mut local_extra, size);
            put_u64(&mut local_extra, size);
            ZIP64_SENTINEL
        } else {
            size as u32
        };

        let local = &mut self.body;
        local.extend_from_slice(b"PK\x03\x04");
        put_u16(local, version);
        put_u16(local, UTF8_FLAG);
        put_u16(local, 0); // stored
        put_u16(local, 0);
        put_u16(local, DOS_DATE);
        put_u32(local, crc);
        put_u32(local, local_size);
        put_u32(local, local_size);
        put_u16(local, name.len() as u16);
        put_u16(local, local_extra.len() as u16);
        local.extend_from_slice(name.as_bytes());
        local.extend_from_slice(&local_extra);
        local.extend_from_slice(data);

        let mut central_extra = Vec::new();
        let (central_size, central_offset) = if zip64 {
            put_u16(&mut central_extra, 0x0001);
            put_u16(&mut central_extra, 24);
            put_u64(&mut central_extra, size);
            put_u64(&mut central_extra, size);
            put_u64(&mut central_extra, offset);
            (ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (size as u32, offset as u32)
        };

        let mut central = Vec::new();
        central.extend_from_slice(b"PK\x01\x02");
        put_u16(&mut central, version);
        put_u16(&mut central, version);
        put_u16(&mut central, UTF8_FLAG);
        put_u16(&mut central, 0);
        put_u16(&mut central, 0);
        put_u16(&mut central, DOS_DATE);
        put_u32(&mut central, crc);
        put_u32(&mut central, central_size);
        put_u32(&mut central, central_size);
        put_u16(&mut central, name.len() as u16);
        put_u16(&mut central, central_extra.len() as u16);
        put_u16(&mut central, 0); // comment
        put_u16(&mut central, 0); // disk
        put_u16(&mut central, 0); // internal attributes
        put_u32(&mut central, 0); // external attributes
        put_u32(&mut central, central_offset);
        central.extend_from_slice(name.as_bytes());
        central.extend_from_slice(&central_extra);

        self.central.push(central);
        self.offsets.push(offset);
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = self.body.clone();
        let central_offset = out.len() as u64;
        for record in &self.central {
            out.extend_from_slice(record);
        }
        let central_size = out.len() as u64 - central_offset;
        let entries = self.central.len() as u64;

        if self.zip64_end {
            let record_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put_u64(&mut out, 44);
            put_u16(&mut out, 45);
            put_u16(&mut out, 45);
            put_u32(&mut out, 0);
            put_u32(&mut out, 0);
            put_u64(&mut out, entries);
            put_u64(&mut out, entries);
            put_u64(&mut out, central_size);
            put_u64(&mut out, central_offset);

            out.extend_from_slice(b"PK\x06\x07");
            put_u32(&mut out, 0);
            put_u64(&mut out, record_offset);
            put_u32(&mut out, 1);
        }

        out.extend_from_slice(b"PK\x05\x06");
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        if self.zip64_end {
            put_u16(&mut out, u16::MAX);
            put_u16(&mut out, u16::MAX);
            put_u32(&mut out, ZIP64_SENTINEL);
            put_u32(&mut out, ZIP64_SENTINEL);
        } else {
            put_u16(&mut out, entries as u16);
            put_u16(&mut out, entries as u16);
            put_u32(&mut out, central_size as u32);
            put_u32(&mut out, central_offset as u32);
        }
        put_u16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out
    }
}

fn put_u16(v: &mut Vec<u8>, n: u16) {
    v.extend_from_slice(&n.to_le_bytes());
}

fn put_u32(v: &mut Vec<u8>, n: u32) {
    v.extend_from_slice(&n.to_le_bytes());
}

fn put_u64(v: &mut Vec<u8>, n: u64) {
    v.extend_from_slice(&n.to_le_bytes());
}

/// Splits an in-memory archive, returning the receipt's bytes.
pub fn split_to_vec<C: ChunkStore + ?Sized>(
    archive: &[u8],
    container_name: &str,
    store: &mut C,
) -> ZipSplitResult<(Vec<u8>, SplitSummary)> {
    let mut receipt = ReceiptWriter::new(Vec::new());
    let summary = split::split_archive(
        &mut Cursor::new(archive),
        container_name,
        &mut receipt,
        store,
    )?;
    Ok((receipt.into_inner(), summary))
}

/// Restores an in-memory receipt, checking the result's hash.
pub fn restore_to_vec<C: ChunkStore + ?Sized>(
    receipt: &[u8],
    store: &C,
) -> ZipSplitResult<Vec<u8>> {
    let mut reader = ReceiptReader::new(Cursor::new(receipt))?;
    let mut restored = Vec::new();
    split::restore_verified(&mut reader, store, &mut restored, true)?;
    Ok(restored)
}
