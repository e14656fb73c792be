//! zipsplit deduplicates ZIP archives against a shared chunk store.
//!
//! Each archive is replaced by a small *receipt*: its local headers,
//! small entries and central directory are kept inline,
//! while every large entry's compressed data goes to a content-addressed
//! store, where identical payloads from any number of archives are kept once.
//! The receipt (and the store) can rebuild the archive byte for byte.
//!
//! ```no_run
//! # use std::fs::File;
//! # use camino::Utf8Path;
//! # use zipsplit::*;
//! # use zipsplit::receipt::*;
//! # use zipsplit::store::*;
//! # use zipsplit::split::*;
//! DiskChunkStore::init("Chunks")?;
//! let mut store = DiskChunkStore::open("Chunks", OpenMode::ReadWrite)?;
//!
//! let mut receipt = ReceiptWriter::new(File::create("foo.zip.ZipSplit")?);
//! split_file(Utf8Path::new("foo.zip"), &mut receipt, &mut store)?;
//! // The receipt is only good once its chunks are on disk.
//! store.flush()?;
//! drop(receipt);
//!
//! // Later, the other way:
//! let mut receipt = ReceiptReader::new(File::open("foo.zip.ZipSplit")?)?;
//! let mut restored = File::create("foo.zip")?;
//! restore_verified(&mut receipt, &store, &mut restored, true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Nothing here decompresses anything.
//! Entries are treated as opaque runs of bytes, found through the
//! central directory (with ZIP64 support) and copied or hashed through a
//! fixed-size buffer, so memory use doesn't grow with the archive.

pub mod read;
pub mod receipt;
pub mod result;
pub mod split;
pub mod store;
pub mod util;

pub use read::EntryMetadata;
pub use read::ZipArchive;
pub use result::{ErrorKind, ZipSplitError, ZipSplitResult};

mod arch;
mod spec;
