//! The content-addressed chunk store
//!
//! Chunks are keyed by the SHA-256 of their bytes and stored once,
//! however many archives contain them.
//! On disk, the store is split into 256 buckets by the hash's first byte:
//!
//! ```text
//! <root>/Lock                   held by the (single) writer
//! <root>/<XX>/Index.json        hash -> size and provenance, for this bucket
//! <root>/<XX>/<full hash>       the chunk's bytes
//! ```
//!
//! where `XX` is the first byte of the hash in upper-case hex.
//! The index is the only thing that says whether a chunk exists.
//! It's loaded lazily per bucket, changed in memory,
//! and only written back by [`ChunkStore::flush()`],
//! through a temporary file renamed over the old index.

use std::collections::hash_map::{self, HashMap};
use std::collections::{btree_map, BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use log::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::result::*;
use crate::util::copy_exact;

pub const INDEX_FILE_NAME: &str = "Index.json";
pub const INDEX_TEMP_FILE_NAME: &str = "Index.json.tmp";
pub const LOCK_FILE_NAME: &str = "Lock";

/// Somewhere to put shared chunks.
pub trait ChunkStore {
    /// Stores the next `length` bytes of `source` under `hash`,
    /// unless a chunk with that hash is already stored.
    /// Either way, records that `entry_name` in `container_name` holds it.
    fn add_chunk(
        &mut self,
        hash: &[u8],
        source: &mut dyn Read,
        length: u64,
        container_name: &str,
        entry_name: &str,
    ) -> ZipSplitResult<()>;

    /// Opens the chunk with the given hash for reading.
    fn open_chunk(&self, hash: &[u8]) -> ZipSplitResult<Box<dyn Read>>;

    /// Makes every change so far durable.
    fn flush(&mut self) -> ZipSplitResult<()>;

    /// Bytes of new chunks added by this instance (not counting duplicates)
    fn added_bytes(&self) -> u64;

    /// Number of new chunks added by this instance
    fn added_chunks(&self) -> u64;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// No lock is taken; any number of readers can coexist with a writer.
    ReadOnly,
    /// Takes the store's lock. Only one writer at a time.
    ReadWrite,
}

/// Where a chunk was found: which archive, and which entry in it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    #[serde(rename = "Item1")]
    pub container: String,
    #[serde(rename = "Item2")]
    pub entry: String,
}

/// What a bucket's index knows about one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "Refs", default)]
    pub refs: BTreeSet<ChunkRef>,
}

/// The index of one bucket, keyed by upper-case hex hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIndex {
    #[serde(rename = "Files", default)]
    pub files: BTreeMap<String, IndexEntry>,
}

/// A chunk store in a directory
pub struct DiskChunkStore {
    root: Utf8PathBuf,
    mode: OpenMode,
    /// Held for as long as we're the writer
    lock: Option<File>,
    /// Bucket indexes we've loaded so far
    buckets: HashMap<u8, BucketIndex>,
    /// Buckets changed since the last flush
    dirty: BTreeSet<u8>,
    added_bytes: u64,
    added_chunks: u64,
}

fn bucket_of(hash: &[u8]) -> ZipSplitResult<u8> {
    hash.first()
        .copied()
        .ok_or_else(|| ZipSplitError::MissingChunk(String::new()))
}

fn bucket_dir(root: &Utf8Path, bucket: u8) -> Utf8PathBuf {
    root.join(hex::encode_upper([bucket]))
}

fn read_index(root: &Utf8Path, bucket: u8) -> ZipSplitResult<BucketIndex> {
    let path = bucket_dir(root, bucket).join(INDEX_FILE_NAME);
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!("No index at {path}, starting an empty one");
            return Ok(BucketIndex::default());
        }
        Err(e) => return Err(e.into()),
    };
    let index: BucketIndex =
        serde_json::from_str(&text).map_err(|e| ZipSplitError::CorruptIndex(path.clone(), e))?;
    debug!("Loaded {} ({} chunks)", path, index.files.len());
    Ok(index)
}

/// Returns the bucket's index, loading it on first use.
fn load_bucket<'a>(
    buckets: &'a mut HashMap<u8, BucketIndex>,
    root: &Utf8Path,
    bucket: u8,
) -> ZipSplitResult<&'a mut BucketIndex> {
    Ok(match buckets.entry(bucket) {
        hash_map::Entry::Occupied(o) => o.into_mut(),
        hash_map::Entry::Vacant(v) => v.insert(read_index(root, bucket)?),
    })
}

impl DiskChunkStore {
    /// Creates an empty store at `root` (and any missing parents).
    pub fn init<P: AsRef<Utf8Path>>(root: P) -> ZipSplitResult<()> {
        fs::create_dir_all(root.as_ref())?;
        Ok(())
    }

    /// Opens the store at `root`.
    ///
    /// Opening for writing fails with [`ZipSplitError::Locked`]
    /// if another writer has it open.
    pub fn open<P: AsRef<Utf8Path>>(root: P, mode: OpenMode) -> ZipSplitResult<Self> {
        let root = root.as_ref().to_owned();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No chunk store at {root}"),
            )
            .into());
        }

        let lock = match mode {
            OpenMode::ReadOnly => None,
            OpenMode::ReadWrite => {
                let lock_file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(root.join(LOCK_FILE_NAME))?;
                match lock_file.try_lock_exclusive() {
                    Ok(()) => Some(lock_file),
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
                    {
                        return Err(ZipSplitError::Locked(root));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };
        debug!("Opened chunk store {} ({:?})", root, mode);

        Ok(Self {
            root,
            mode,
            lock,
            buckets: HashMap::new(),
            dirty: BTreeSet::new(),
            added_bytes: 0,
            added_chunks: 0,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Where the chunk with the given hash lives (or would live)
    pub fn chunk_path(&self, hash: &[u8]) -> ZipSplitResult<Utf8PathBuf> {
        Ok(bucket_dir(&self.root, bucket_of(hash)?).join(hex::encode_upper(hash)))
    }

    /// Looks up a chunk in the index.
    pub fn index_entry(&mut self, hash: &[u8]) -> ZipSplitResult<Option<&IndexEntry>> {
        let index = load_bucket(&mut self.buckets, &self.root, bucket_of(hash)?)?;
        Ok(index.files.get(&hex::encode_upper(hash)))
    }

    /// True if any changes haven't been flushed yet
    pub fn has_unflushed_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Forgets every index change made since the last flush.
    ///
    /// Affected buckets are reloaded from disk the next time they're needed.
    /// Chunk files written since then stay put, but with no index entry
    /// they're written again the next time something adds them.
    pub fn discard_unflushed(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        warn!(
            "Discarding unflushed index changes to {} bucket(s) in {}",
            self.dirty.len(),
            self.root
        );
        for bucket in std::mem::take(&mut self.dirty) {
            self.buckets.remove(&bucket);
        }
    }

    fn write_index(&self, bucket: u8) -> ZipSplitResult<()> {
        let Some(index) = self.buckets.get(&bucket) else {
            return Ok(());
        };
        let dir = bucket_dir(&self.root, bucket);
        fs::create_dir_all(&dir)?;

        let temp_path = dir.join(INDEX_TEMP_FILE_NAME);
        let json = serde_json::to_vec(index).map_err(io::Error::from)?;
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(&json)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, dir.join(INDEX_FILE_NAME))?;
        debug!("Flushed {} ({} chunks)", dir, index.files.len());
        Ok(())
    }
}

impl ChunkStore for DiskChunkStore {
    fn add_chunk(
        &mut self,
        hash: &[u8],
        source: &mut dyn Read,
        length: u64,
        container_name: &str,
        entry_name: &str,
    ) -> ZipSplitResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(ZipSplitError::ReadOnly);
        }

        let bucket = bucket_of(hash)?;
        let hex_hash = hex::encode_upper(hash);
        let dir = bucket_dir(&self.root, bucket);
        let index = load_bucket(&mut self.buckets, &self.root, bucket)?;

        let entry = match index.files.entry(hex_hash) {
            btree_map::Entry::Occupied(occupied) => {
                debug!("Chunk {} already stored", occupied.key());
                occupied.into_mut()
            }
            btree_map::Entry::Vacant(vacant) => {
                fs::create_dir_all(&dir)?;
                // Copy to a temporary file first so a short copy
                // never leaves a truncated chunk under a valid name.
                let mut temp = NamedTempFile::new_in(&dir)?;
                copy_exact(source, &mut temp, length)?;
                temp.as_file().sync_all()?;
                temp.persist(dir.join(vacant.key())).map_err(|e| e.error)?;

                debug!("Stored chunk {} ({} bytes)", vacant.key(), length);
                self.added_bytes += length;
                self.added_chunks += 1;
                vacant.insert(IndexEntry {
                    size: length,
                    refs: BTreeSet::new(),
                })
            }
        };
        entry.refs.insert(ChunkRef {
            container: container_name.to_owned(),
            entry: entry_name.to_owned(),
        });
        self.dirty.insert(bucket);
        Ok(())
    }

    fn open_chunk(&self, hash: &[u8]) -> ZipSplitResult<Box<dyn Read>> {
        let path = self.chunk_path(hash)?;
        match File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ZipSplitError::MissingChunk(hex::encode_upper(hash)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> ZipSplitResult<()> {
        let dirty: Vec<u8> = self.dirty.iter().copied().collect();
        for bucket in dirty {
            self.write_index(bucket)?;
            self.dirty.remove(&bucket);
        }
        Ok(())
    }

    fn added_bytes(&self) -> u64 {
        self.added_bytes
    }

    fn added_chunks(&self) -> u64 {
        self.added_chunks
    }
}

impl Drop for DiskChunkStore {
    fn drop(&mut self) {
        self.discard_unflushed();
        if let Some(lock) = &self.lock {
            let _ = lock.unlock();
        }
    }
}

/// A store that only counts what a real one would hold
///
/// Remembers every hash it's seen so that duplicates (even across archives)
/// aren't counted twice. Never reads chunk data.
#[derive(Debug, Default)]
pub struct ChunkStoreEstimator {
    seen: HashSet<Vec<u8>>,
    added_bytes: u64,
    added_chunks: u64,
}

impl ChunkStoreEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for ChunkStoreEstimator {
    fn add_chunk(
        &mut self,
        hash: &[u8],
        _source: &mut dyn Read,
        length: u64,
        _container_name: &str,
        _entry_name: &str,
    ) -> ZipSplitResult<()> {
        if self.seen.insert(hash.to_vec()) {
            self.added_bytes += length;
            self.added_chunks += 1;
        }
        Ok(())
    }

    fn open_chunk(&self, _hash: &[u8]) -> ZipSplitResult<Box<dyn Read>> {
        Err(ZipSplitError::NoChunkData)
    }

    fn flush(&mut self) -> ZipSplitResult<()> {
        Ok(())
    }

    fn added_bytes(&self) -> u64 {
        self.added_bytes
    }

    fn added_chunks(&self) -> u64 {
        self.added_chunks
    }
}
