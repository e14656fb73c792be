//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! Unlike a ZIP reader, we never decompress anything.
//! All we want from these structures is where each entry's bytes start and end.
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;

use codepage_437::*;
use memchr::memmem;

use crate::read::EntryMetadata;
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Sentinel stored in 32-bit fields whose real value lives in a Zip64 record
pub const ZIP64_SENTINEL_U32: u32 = u32::MAX;
/// Sentinel stored in 16-bit fields whose real value lives in a Zip64 record
pub const ZIP64_SENTINEL_U16: u16 = u16::MAX;

/// Header ID of the Zip64 extended information extra field
const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

// Callers check lengths before using these,
// so running off the end is a bug, not bad input.

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(int_bytes);
    u64::from_le_bytes(bytes)
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(int_bytes);
    u32::from_le_bytes(bytes)
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes([int_bytes[0], int_bytes[1]])
}

/// Splits `len` bytes off the front of `input`, or fails with `err`.
fn take<'a>(input: &mut &'a [u8], len: usize, err: &'static str) -> ZipSplitResult<&'a [u8]> {
    if input.len() < len {
        return Err(ZipSplitError::InvalidArchive(err));
    }
    let (taken, rest) = input.split_at(len);
    *input = rest;
    Ok(taken)
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug, Copy, Clone)]
pub struct EndOfCentralDirectory {
    pub entries_on_this_disk: u16,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    pub fn parse(mut eocdr: &[u8]) -> ZipSplitResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let mut fixed = take(
            &mut eocdr,
            Self::fixed_size_in_file(),
            "Truncated End Of Central Directory Record",
        )?;
        if fixed[..4] != EOCDR_MAGIC {
            return Err(ZipSplitError::InvalidArchive(
                "Invalid End Of Central Directory Record signature",
            ));
        }
        // Skip the signature and the disk numbers.
        fixed = &fixed[8..];
        let entries_on_this_disk = read_u16(&mut fixed);
        // The central directory's size isn't needed: entries are walked until
        // we've seen as many as promised.
        fixed = &fixed[6..];
        let central_directory_offset = read_u32(&mut fixed);

        Ok(Self {
            entries_on_this_disk,
            central_directory_offset,
        })
    }

    /// An archive is Zip64 iff the central directory offset is the 32-bit sentinel.
    pub fn is_zip64(&self) -> bool {
        self.central_directory_offset == ZIP64_SENTINEL_U32
    }

    pub const fn fixed_size_in_file() -> usize {
        22
    }

    /// The largest an EOCDR can be: the fixed part plus a maximal comment.
    pub const fn max_size_in_file() -> usize {
        Self::fixed_size_in_file() + u16::MAX as usize
    }
}

/// Searches backward through the tail of an archive to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
/// Comments can contain the magic number too, so prefer the candidate whose
/// comment runs exactly to the end of `tail`.
/// If none does (trailing junk, a lying comment length), take the last signature.
pub fn find_eocdr(tail: &[u8]) -> ZipSplitResult<usize> {
    let mut fallback = None;
    for posit in memmem::rfind_iter(tail, &EOCDR_MAGIC) {
        let candidate = &tail[posit..];
        if candidate.len() < EndOfCentralDirectory::fixed_size_in_file() {
            continue;
        }
        let comment_length = u16::from_le_bytes([candidate[20], candidate[21]]) as usize;
        if candidate.len() == EndOfCentralDirectory::fixed_size_in_file() + comment_length {
            return Ok(posit);
        }
        fallback.get_or_insert(posit);
    }
    fallback.ok_or(ZipSplitError::InvalidArchive(
        "Couldn't find End Of Central Directory Record",
    ))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug, Copy, Clone)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub zip64_eocdr_offset: u64,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn parse(mut locator: &[u8]) -> ZipSplitResult<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        let mut fixed = take(
            &mut locator,
            Self::size_in_file(),
            "Truncated Zip64 End Of Central Directory Locator",
        )?;
        if fixed[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return Err(ZipSplitError::InvalidArchive(
                "Invalid Zip64 End Of Central Directory Locator signature",
            ));
        }
        fixed = &fixed[8..];
        let zip64_eocdr_offset = read_u64(&mut fixed);

        Ok(Self { zip64_eocdr_offset })
    }

    pub const fn size_in_file() -> usize {
        20
    }
}

/// Data from the Zip64 end of central directory record
///
/// Holds 64-bit versions of everything the plain EOCDR can't fit.
#[derive(Debug, Copy, Clone)]
pub struct Zip64EndOfCentralDirectory {
    pub entries_on_this_disk: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Given the record's leading bytes (at least [`size_prefix_in_file()`]),
    /// returns the size of the whole record, including those leading bytes.
    ///
    /// [`size_prefix_in_file()`]: #method.size_prefix_in_file
    pub fn total_size(mut prefix: &[u8]) -> ZipSplitResult<u64> {
        let mut fixed = take(
            &mut prefix,
            Self::size_prefix_in_file(),
            "Truncated Zip64 End Of Central Directory Record",
        )?;
        if fixed[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ZipSplitError::InvalidArchive(
                "Invalid Zip64 End Of Central Directory Record signature",
            ));
        }
        fixed = &fixed[4..];
        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        read_u64(&mut fixed)
            .checked_add(Self::size_prefix_in_file() as u64)
            .ok_or(ZipSplitError::InvalidArchive(
                "Invalid Zip64 End Of Central Directory Record size",
            ))
    }

    pub fn parse(mut eocdr: &[u8]) -> ZipSplitResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        let total_size = Self::total_size(eocdr)?;
        if total_size < Self::fixed_size_in_file() as u64 || total_size != eocdr.len() as u64 {
            return Err(ZipSplitError::InvalidArchive(
                "Invalid extensible data length in Zip64 End Of Central Directory Record",
            ));
        }
        // Skip the versions and disk numbers.
        eocdr = &eocdr[Self::size_prefix_in_file() + 12..];
        let entries_on_this_disk = read_u64(&mut eocdr);
        // Skip the total entry count and the directory's size.
        eocdr = &eocdr[16..];
        let central_directory_offset = read_u64(&mut eocdr);
        // Whatever's left is the extensible data sector, which we don't need.

        Ok(Self {
            entries_on_this_disk,
            central_directory_offset,
        })
    }

    /// Signature plus the size field: enough to learn the record's full size.
    pub const fn size_prefix_in_file() -> usize {
        12
    }

    pub const fn fixed_size_in_file() -> usize {
        56
    }
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub flags: u16,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub const fn fixed_size_in_file() -> usize {
        46
    }

    /// Given at least the fixed part of an entry,
    /// returns its full size (fixed part, path, extra field and comment).
    ///
    /// This lets a buffered reader know how much it needs before parsing.
    pub fn size_in_file(prefix: &[u8]) -> ZipSplitResult<usize> {
        if prefix.len() < Self::fixed_size_in_file() {
            return Err(ZipSplitError::InvalidArchive(
                "Truncated central directory entry",
            ));
        }
        if prefix[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipSplitError::InvalidArchive(
                "Invalid central directory entry",
            ));
        }
        let mut lengths = &prefix[28..34];
        let path_length = read_u16(&mut lengths) as usize;
        let extra_field_length = read_u16(&mut lengths) as usize;
        let file_comment_length = read_u16(&mut lengths) as usize;
        Ok(Self::fixed_size_in_file() + path_length + extra_field_length + file_comment_length)
    }

    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipSplitResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let total = Self::size_in_file(entry)?;
        let mut record = take(entry, total, "Truncated central directory entry")?;
        // Skip the signature and both versions.
        record = &record[8..];
        let flags = read_u16(&mut record);
        // Skip the method, timestamps and CRC; the data is copied verbatim.
        record = &record[10..];
        let compressed_size = read_u32(&mut record);
        let uncompressed_size = read_u32(&mut record);
        let path_length = read_u16(&mut record) as usize;
        let extra_field_length = read_u16(&mut record) as usize;
        let _file_comment_length = read_u16(&mut record);
        let disk_number = read_u16(&mut record);
        // Skip the file attributes.
        record = &record[6..];
        let header_offset = read_u32(&mut record);
        // The comment follows, but nothing needs it.
        let (path, remaining) = record.split_at(path_length);
        let extra_field = &remaining[..extra_field_length];

        Ok(Self {
            flags,
            compressed_size,
            uncompressed_size,
            disk_number,
            header_offset,
            path,
            extra_field,
        })
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumped to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Decodes an entry name for display and provenance records.
///
/// Names never feed back into the archive bytes,
/// so invalid UTF-8 is replaced rather than rejected.
pub fn decode_name(flags: u16, raw: &[u8]) -> String {
    if is_utf8(flags) {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        let cow: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        cow.into_owned()
    }
}

impl EntryMetadata {
    /// Extracts `EntryMetadata` from a central directory entry,
    /// applying any Zip64 overrides from its extra field.
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry) -> ZipSplitResult<Self> {
        let mut metadata = Self {
            size: cde.uncompressed_size as u64,
            compressed_size: cde.compressed_size as u64,
            header_offset: cde.header_offset as u64,
            disk_start: cde.disk_number as u32,
            flags: cde.flags,
            name: decode_name(cde.flags, cde.path),
            raw_name: cde.path.to_vec(),
            extra_field: cde.extra_field.to_vec(),
        };

        apply_zip64_extra_field(&mut metadata, cde)?;

        Ok(metadata)
    }
}

/// Parses the "extra fields" found in central directory entries,
/// looking for Zip64 info (64-bit values for files > 2^32 in size).
///
/// The original 32-bit values decide which replacements are present:
/// only fields holding their sentinel get one, in a fixed order.
fn apply_zip64_extra_field(
    metadata: &mut EntryMetadata,
    cde: &CentralDirectoryEntry,
) -> ZipSplitResult<()> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:

    //     header1+data1 + header2+data2 . . .

    // Each header MUST consist of:

    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut extra_field = cde.extra_field;
    let mut zip64 = None;
    // Fewer than four bytes left can't be a header; some writers pad.
    while extra_field.len() >= 4 {
        let kind = read_u16(&mut extra_field);
        let field_len = read_u16(&mut extra_field) as usize;
        let data = take(
            &mut extra_field,
            field_len,
            "Extra field runs past the end of its entry",
        )?;
        if kind == ZIP64_EXTRA_FIELD_ID {
            zip64 = Some(data);
        }
    }

    let Some(mut data) = zip64 else {
        return Ok(());
    };

    // 4.5.3 -Zip64 Extended Information Extra Field (0x0001):
    //
    //   Original
    //   Size       8 bytes    Original uncompressed file size
    //   Compressed
    //   Size       8 bytes    Size of compressed data
    //   Relative Header
    //   Offset     8 bytes    Offset of local header record
    //   Disk Start
    //   Number     4 bytes    Number of the disk on which
    //                         this file starts
    const MISSING: &str = "Zip64 extra field is missing a value its entry requires";
    if cde.uncompressed_size == ZIP64_SENTINEL_U32 {
        metadata.size = read_u64(&mut take(&mut data, 8, MISSING)?);
    }
    if cde.compressed_size == ZIP64_SENTINEL_U32 {
        metadata.compressed_size = read_u64(&mut take(&mut data, 8, MISSING)?);
    }
    if cde.header_offset == ZIP64_SENTINEL_U32 {
        metadata.header_offset = read_u64(&mut take(&mut data, 8, MISSING)?);
    }
    if cde.disk_number == ZIP64_SENTINEL_U16 {
        metadata.disk_start = read_u32(&mut take(&mut data, 4, MISSING)?);
    }
    Ok(())
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// We only read the fixed part: enough to know how long the whole header is
/// so that it can be copied through untouched.
#[derive(Debug, Copy, Clone)]
pub struct LocalFileHeader {
    pub flags: u16,
    /// Never Zip64-adjusted; the central directory's value is authoritative.
    pub compressed_size: u32,
    pub path_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn parse(mut header: &[u8]) -> ZipSplitResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let mut fixed = take(
            &mut header,
            Self::fixed_size_in_file(),
            "Truncated local file header",
        )?;
        if fixed[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipSplitError::InvalidArchive("Invalid local file header"));
        }
        // Skip the signature and version.
        fixed = &fixed[6..];
        let flags = read_u16(&mut fixed);
        // Skip the method, timestamps and CRC.
        fixed = &fixed[10..];
        let compressed_size = read_u32(&mut fixed);
        let _uncompressed_size = read_u32(&mut fixed);
        let path_length = read_u16(&mut fixed);
        let extra_field_length = read_u16(&mut fixed);

        Ok(Self {
            flags,
            compressed_size,
            path_length,
            extra_field_length,
        })
    }

    pub const fn fixed_size_in_file() -> usize {
        30
    }

    /// The size of the entire header: fixed part, path and extra field.
    pub fn size_in_file(&self) -> u64 {
        Self::fixed_size_in_file() as u64 + self.path_length as u64 + self.extra_field_length as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn eocdr(comment: &[u8]) -> Vec<u8> {
        let mut v = EOCDR_MAGIC.to_vec();
        v.extend_from_slice(&[0; 4]);
        v.extend_from_slice(&3u16.to_le_bytes());
        v.extend_from_slice(&3u16.to_le_bytes());
        v.extend_from_slice(&100u32.to_le_bytes());
        v.extend_from_slice(&200u32.to_le_bytes());
        v.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        v.extend_from_slice(comment);
        v
    }

    fn cde(compressed: u32, uncompressed: u32, offset: u32, disk: u16, extra: &[u8]) -> Vec<u8> {
        let mut v = CENTRAL_DIRECTORY_MAGIC.to_vec();
        v.extend_from_slice(&[20, 0, 20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        v.extend_from_slice(&0u32.to_le_bytes());
        v.extend_from_slice(&compressed.to_le_bytes());
        v.extend_from_slice(&uncompressed.to_le_bytes());
        v.extend_from_slice(&5u16.to_le_bytes());
        v.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&disk.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes());
        v.extend_from_slice(&offset.to_le_bytes());
        v.extend_from_slice(b"a.bin");
        v.extend_from_slice(extra);
        v
    }

    fn metadata_of(record: &[u8]) -> ZipSplitResult<EntryMetadata> {
        let mut slice = record;
        let entry = CentralDirectoryEntry::parse_and_consume(&mut slice)?;
        assert!(slice.is_empty());
        EntryMetadata::from_cde(&entry)
    }

    #[test]
    fn finds_eocdr_at_the_end() {
        let mut tail = vec![0xAA; 40];
        tail.extend(eocdr(b""));
        assert_eq!(find_eocdr(&tail).unwrap(), 40);
        let parsed = EndOfCentralDirectory::parse(&tail[40..]).unwrap();
        assert_eq!(parsed.entries_on_this_disk, 3);
        assert_eq!(parsed.central_directory_offset, 200);
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn signature_inside_comment_is_skipped() {
        // The comment holds something that looks like a (short) EOCDR.
        let mut comment = EOCDR_MAGIC.to_vec();
        comment.extend_from_slice(&[0; 30]);
        let record = eocdr(&comment);
        assert_eq!(find_eocdr(&record).unwrap(), 0);
    }

    #[test]
    fn missing_eocdr_is_an_error() {
        let junk = vec![0u8; 600];
        assert!(matches!(
            find_eocdr(&junk),
            Err(ZipSplitError::InvalidArchive(_))
        ));
    }

    #[test]
    fn zip64_sizes_override_sentinels() {
        let mut extra = vec![0x01, 0x00, 16, 0];
        extra.extend_from_slice(&(5u64 << 32).to_le_bytes());
        extra.extend_from_slice(&(6u64 << 32).to_le_bytes());
        let record = cde(u32::MAX, u32::MAX, 1234, 0, &extra);
        let meta = metadata_of(&record).unwrap();
        assert_eq!(meta.size, 5 << 32);
        assert_eq!(meta.compressed_size, 6 << 32);
        assert_eq!(meta.header_offset, 1234);
        assert_eq!(meta.name, "a.bin");
    }

    #[test]
    fn zip64_values_are_only_consumed_for_sentinels() {
        // Only the compressed size and the disk are sentinels,
        // so the first value belongs to the compressed size.
        let mut extra = vec![0x01, 0x00, 12, 0];
        extra.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());
        extra.extend_from_slice(&7u32.to_le_bytes());
        let record = cde(u32::MAX, 10, 99, u16::MAX, &extra);
        let meta = metadata_of(&record).unwrap();
        assert_eq!(meta.size, 10);
        assert_eq!(meta.compressed_size, 0x1_0000_0000);
        assert_eq!(meta.header_offset, 99);
        assert_eq!(meta.disk_start, 7);
    }

    #[test]
    fn zip64_offset_override() {
        let mut extra = vec![0x0A, 0x00, 4, 0, 1, 2, 3, 4];
        extra.extend_from_slice(&[0x01, 0x00, 8, 0]);
        extra.extend_from_slice(&0x2_0000_0000u64.to_le_bytes());
        let record = cde(70_000, 70_000, u32::MAX, 0, &extra);
        let meta = metadata_of(&record).unwrap();
        assert_eq!(meta.compressed_size, 70_000);
        assert_eq!(meta.header_offset, 0x2_0000_0000);
    }

    #[test]
    fn short_zip64_field_is_an_error() {
        let extra = vec![0x01, 0x00, 4, 0, 1, 2, 3, 4];
        let record = cde(u32::MAX, 1, 0, 0, &extra);
        assert!(matches!(
            metadata_of(&record),
            Err(ZipSplitError::InvalidArchive(_))
        ));
    }

    #[test]
    fn truncated_entry_is_an_error() {
        let record = cde(1, 1, 0, 0, &[]);
        let mut slice = &record[..record.len() - 1];
        assert!(CentralDirectoryEntry::parse_and_consume(&mut slice).is_err());
    }

    #[test]
    fn local_header_size() {
        let mut v = LOCAL_FILE_HEADER_MAGIC.to_vec();
        v.extend_from_slice(&[0; 22]);
        v.extend_from_slice(&7u16.to_le_bytes());
        v.extend_from_slice(&9u16.to_le_bytes());
        let header = LocalFileHeader::parse(&v).unwrap();
        assert_eq!(header.size_in_file(), 30 + 7 + 9);

        v[0] = b'Q';
        assert!(LocalFileHeader::parse(&v).is_err());
    }

    #[test]
    fn cp437_names() {
        assert_eq!(decode_name(0, b"caf\x82"), "café");
        assert_eq!(decode_name(1 << 11, "café".as_bytes()), "café");
    }
}
