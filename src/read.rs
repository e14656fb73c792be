//! Tools for reading a ZIP archive's structure.
//!
//! To start reading an archive, first create a [`ZipArchive`] from a seekable
//! source. It reads only the records at the back of the file;
//! the central directory is walked lazily with [`ZipArchive::entries()`],
//! and entry data is never touched.
//!
//! [`ZipArchive`]: struct.ZipArchive.html
//! [`ZipArchive::entries()`]: struct.ZipArchive.html#method.entries

use std::io::{self, Read, Seek, SeekFrom};

use log::*;

use crate::arch::usize;
use crate::result::*;
use crate::spec;

/// How much of the end of the file we search for the End of central directory record
pub const EOCD_SEARCH_WINDOW: usize = spec::EndOfCentralDirectory::max_size_in_file();

/// How much of the central directory we read at a time
pub const CENTRAL_DIRECTORY_WINDOW: usize = 4 * 1024 * 1024;

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
/// (with any Zip64 overrides applied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// Compressed size of the file in bytes.
    /// This is exactly how many bytes follow the local file header.
    pub compressed_size: u64,

    /// The offset to the local file header in the archive
    pub header_offset: u64,

    /// The disk the entry starts on
    pub disk_start: u32,

    /// General purpose bit flags
    pub flags: u16,

    /// The entry's name, decoded for display.
    pub name: String,

    /// The entry's name, exactly as stored
    pub raw_name: Vec<u8>,

    /// The entry's extra field, exactly as stored
    pub extra_field: Vec<u8>,
}

impl EntryMetadata {
    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        self.size == 0 && self.name.ends_with('/')
    }
}

/// A local file header, as found in the archive.
///
/// We keep the fixed-size part verbatim so that it can be copied out unchanged.
#[derive(Debug, Clone)]
pub struct LocalHeaderView {
    /// Where the header starts in the archive
    pub offset: u64,
    pub(crate) header: spec::LocalFileHeader,
    pub(crate) raw: [u8; spec::LocalFileHeader::fixed_size_in_file()],
}

impl LocalHeaderView {
    pub fn name_length(&self) -> u16 {
        self.header.path_length
    }

    pub fn extra_field_length(&self) -> u16 {
        self.header.extra_field_length
    }

    /// The header's 32-bit compressed size.
    ///
    /// This may be a Zip64 sentinel and is never overridden;
    /// use the central directory's [`EntryMetadata::compressed_size`] instead.
    pub fn compressed_size(&self) -> u32 {
        self.header.compressed_size
    }

    pub fn flags(&self) -> u16 {
        self.header.flags
    }

    /// The fixed-size part of the header, byte for byte
    pub fn fixed_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The size of the whole header (fixed part, name and extra field)
    pub fn size_in_file(&self) -> u64 {
        self.header.size_in_file()
    }
}

/// Reads exactly `buf.len()` bytes, reporting a short read as a truncated archive.
fn read_exact_or<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    truncated: &'static str,
) -> ZipSplitResult<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(ZipSplitError::InvalidArchive(truncated))
        }
        Err(e) => Err(e.into()),
    }
}

/// The records at the back of a ZIP archive
/// that tell us where its central directory lives
#[derive(Debug, Clone)]
pub struct ZipArchive {
    /// The archive's total length in bytes
    archive_len: u64,
    /// Where the End of central directory record starts
    eocdr_posit: u64,
    eocdr: spec::EndOfCentralDirectory,
    zip64_eocdr: Option<spec::Zip64EndOfCentralDirectory>,
}

impl ZipArchive {
    /// Reads the End of central directory record (and its Zip64 counterpart, if any)
    /// from the given source.
    ///
    /// ```no_run
    /// # use std::fs::File;
    /// # use zipsplit::*;
    /// let mut zip_file = File::open("foo.zip")?;
    /// let archive = ZipArchive::new(&mut zip_file)?;
    /// for entry in archive.entries(&mut zip_file) {
    ///     println!("{}", entry?.name);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new<R: Read + Seek>(reader: &mut R) -> ZipSplitResult<Self> {
        let archive_len = reader.seek(SeekFrom::End(0))?;
        let window = archive_len.min(EOCD_SEARCH_WINDOW as u64);
        let tail_start = archive_len - window;

        reader.seek(SeekFrom::Start(tail_start))?;
        let mut tail = vec![0u8; usize(window)?];
        read_exact_or(reader, &mut tail, "Couldn't read End Of Central Directory Record")?;

        let tail_posit = spec::find_eocdr(&tail)?;
        let eocdr = spec::EndOfCentralDirectory::parse(&tail[tail_posit..])?;
        let eocdr_posit = tail_start + tail_posit as u64;
        trace!("{:?} at {}", eocdr, eocdr_posit);

        let zip64_eocdr = if eocdr.is_zip64() {
            Some(Self::read_zip64_eocdr(reader, eocdr_posit, archive_len)?)
        } else {
            None
        };

        Ok(Self {
            archive_len,
            eocdr_posit,
            eocdr,
            zip64_eocdr,
        })
    }

    fn read_zip64_eocdr<R: Read + Seek>(
        reader: &mut R,
        eocdr_posit: u64,
        archive_len: u64,
    ) -> ZipSplitResult<spec::Zip64EndOfCentralDirectory> {
        // The locator sits right before the plain EOCDR.
        let locator_size = spec::Zip64EndOfCentralDirectoryLocator::size_in_file();
        let locator_posit = eocdr_posit
            .checked_sub(locator_size as u64)
            .ok_or(ZipSplitError::InvalidArchive(
                "Too small for Zip64 End Of Central Directory Locator",
            ))?;
        reader.seek(SeekFrom::Start(locator_posit))?;
        let mut locator = [0u8; spec::Zip64EndOfCentralDirectoryLocator::size_in_file()];
        read_exact_or(
            reader,
            &mut locator,
            "Couldn't read Zip64 End Of Central Directory Locator",
        )?;
        let locator = spec::Zip64EndOfCentralDirectoryLocator::parse(&locator)?;
        trace!("{:?}", locator);

        // Read just enough to learn the record's size, then the whole thing.
        let record_posit = locator.zip64_eocdr_offset;
        reader.seek(SeekFrom::Start(record_posit))?;
        let mut prefix = [0u8; spec::Zip64EndOfCentralDirectory::size_prefix_in_file()];
        read_exact_or(
            reader,
            &mut prefix,
            "Couldn't read Zip64 End Of Central Directory Record size",
        )?;
        let record_size = spec::Zip64EndOfCentralDirectory::total_size(&prefix)?;
        if record_posit.saturating_add(record_size) > archive_len {
            return Err(ZipSplitError::InvalidArchive(
                "Zip64 End Of Central Directory Record runs past the end of the file",
            ));
        }

        let mut record = vec![0u8; usize(record_size)?];
        record[..prefix.len()].copy_from_slice(&prefix);
        read_exact_or(
            reader,
            &mut record[prefix.len()..],
            "Couldn't read Zip64 End Of Central Directory Record",
        )?;
        let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(&record)?;
        trace!("{:?}", zip64_eocdr);
        Ok(zip64_eocdr)
    }

    /// The archive's total length in bytes
    pub fn archive_len(&self) -> u64 {
        self.archive_len
    }

    /// Where the End of central directory record starts
    pub fn eocdr_offset(&self) -> u64 {
        self.eocdr_posit
    }

    pub fn is_zip64(&self) -> bool {
        self.zip64_eocdr.is_some()
    }

    /// The number of central directory entries on this disk
    pub fn entry_count(&self) -> u64 {
        match &self.zip64_eocdr {
            Some(z) => z.entries_on_this_disk,
            None => self.eocdr.entries_on_this_disk as u64,
        }
    }

    pub fn central_directory_offset(&self) -> u64 {
        match &self.zip64_eocdr {
            Some(z) => z.central_directory_offset,
            None => self.eocdr.central_directory_offset as u64,
        }
    }

    /// Returns a lazy iterator over the central directory's entries, in archive order.
    ///
    /// Each call starts over from the top of the central directory.
    pub fn entries<'r, R: Read + Seek>(&self, reader: &'r mut R) -> CentralDirectoryEntries<'r, R> {
        self.entries_with_window(reader, CENTRAL_DIRECTORY_WINDOW)
    }

    /// Like [`entries()`](#method.entries), but reads the central directory
    /// `window` bytes at a time.
    ///
    /// Entries straddling a window boundary are handled,
    /// and entries larger than the window grow it.
    pub fn entries_with_window<'r, R: Read + Seek>(
        &self,
        reader: &'r mut R,
        window: usize,
    ) -> CentralDirectoryEntries<'r, R> {
        trace!(
            "{} entries at offset {}",
            self.entry_count(),
            self.central_directory_offset()
        );
        CentralDirectoryEntries {
            reader,
            buf: vec![0; window.max(1)],
            start: 0,
            end: 0,
            next_read: self.central_directory_offset(),
            remaining: self.entry_count(),
            failed: false,
        }
    }

    /// Reads the fixed part of the local file header at `offset`,
    /// leaving `reader` right after it (at the start of the entry's name).
    pub fn read_local_header<R: Read + Seek>(
        reader: &mut R,
        offset: u64,
    ) -> ZipSplitResult<LocalHeaderView> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut raw = [0u8; spec::LocalFileHeader::fixed_size_in_file()];
        read_exact_or(reader, &mut raw, "Truncated local file header")?;
        let header = spec::LocalFileHeader::parse(&raw)?;
        trace!("{:?} at {}", header, offset);
        Ok(LocalHeaderView {
            offset,
            header,
            raw,
        })
    }
}

/// Iterates over an archive's central directory,
/// reading it through a fixed-size window.
///
/// Stops after the entry count given by the End of central directory record,
/// or after the first error.
pub struct CentralDirectoryEntries<'r, R> {
    reader: &'r mut R,
    buf: Vec<u8>,
    /// Start of unconsumed bytes in `buf`
    start: usize,
    /// End of valid bytes in `buf`
    end: usize,
    /// File offset of the byte after `buf[end - 1]`
    next_read: u64,
    remaining: u64,
    failed: bool,
}

impl<R: Read + Seek> CentralDirectoryEntries<'_, R> {
    /// Makes sure at least `needed` unconsumed bytes are buffered.
    fn fill(&mut self, needed: usize) -> ZipSplitResult<()> {
        while self.end - self.start < needed {
            // Realign what's left to the front so the next read can append.
            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }
            if self.buf.len() < needed {
                self.buf.resize(needed, 0);
            }

            self.reader.seek(SeekFrom::Start(self.next_read))?;
            let read = self.reader.read(&mut self.buf[self.end..])?;
            if read == 0 {
                return Err(ZipSplitError::InvalidArchive(
                    "Central directory is truncated",
                ));
            }
            self.end += read;
            self.next_read += read as u64;
        }
        Ok(())
    }

    fn next_entry(&mut self) -> ZipSplitResult<EntryMetadata> {
        self.fill(spec::CentralDirectoryEntry::fixed_size_in_file())?;
        let size = spec::CentralDirectoryEntry::size_in_file(&self.buf[self.start..self.end])?;
        self.fill(size)?;

        let mut record = &self.buf[self.start..self.start + size];
        let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut record)?;
        trace!("{:?}", dir_entry);
        let metadata = EntryMetadata::from_cde(&dir_entry)?;
        debug!("{:?}", metadata);

        self.start += size;
        Ok(metadata)
    }
}

impl<R: Read + Seek> Iterator for CentralDirectoryEntries<'_, R> {
    type Item = ZipSplitResult<EntryMetadata>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(metadata) => {
                self.remaining -= 1;
                Some(Ok(metadata))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
