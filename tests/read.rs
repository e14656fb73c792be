use std::io::Cursor;

use anyhow::Result;

use zipsplit::read::*;
use zipsplit::*;

mod common;
use common::*;

fn names(archive: &ZipArchive, bytes: &[u8], window: usize) -> Result<Vec<String>> {
    let mut cursor = Cursor::new(bytes);
    let entries = archive
        .entries_with_window(&mut cursor, window)
        .map(|e| e.map(|e| e.name))
        .collect::<ZipSplitResult<Vec<_>>>()?;
    Ok(entries)
}

#[test]
fn central_directory_through_small_windows() -> Result<()> {
    init_logging();
    let mut builder = ZipBuilder::new();
    let expected: Vec<String> = (0..50).map(|i| format!("dir/file-{:03}.txt", i)).collect();
    for (i, name) in expected.iter().enumerate() {
        builder.stored(name, &noise(i * 7, i as u64));
    }
    let bytes = builder.finish();
    let archive = ZipArchive::new(&mut Cursor::new(&bytes))?;
    assert_eq!(archive.entry_count(), 50);
    assert!(!archive.is_zip64());

    // Smaller than one entry, a bit more than one, and the whole thing
    for window in [10, 70, CENTRAL_DIRECTORY_WINDOW] {
        assert_eq!(names(&archive, &bytes, window)?, expected, "window {}", window);
    }

    // Restartable
    assert_eq!(names(&archive, &bytes, 64)?, names(&archive, &bytes, 64)?);
    Ok(())
}

#[test]
fn entries_report_central_directory_values() -> Result<()> {
    init_logging();
    let mut builder = ZipBuilder::new();
    builder
        .stored("first", &noise(123, 1))
        .stored("second/", b"")
        .stored("third", &noise(4567, 2));
    let bytes = builder.finish();

    let mut cursor = Cursor::new(&bytes);
    let archive = ZipArchive::new(&mut cursor)?;
    let entries = archive
        .entries(&mut cursor)
        .collect::<ZipSplitResult<Vec<_>>>()?;

    let sizes: Vec<_> = entries.iter().map(|e| e.compressed_size).collect();
    assert_eq!(sizes, [123, 0, 4567]);
    let offsets: Vec<_> = entries.iter().map(|e| e.header_offset).collect();
    assert_eq!(offsets, builder.offsets);
    assert!(entries[1].is_dir());
    assert!(!entries[2].is_dir());

    let local = ZipArchive::read_local_header(&mut cursor, entries[2].header_offset)?;
    assert_eq!(local.name_length(), 5);
    assert_eq!(local.extra_field_length(), 0);
    assert_eq!(local.size_in_file(), 35);
    assert_eq!(local.compressed_size(), 4567);
    Ok(())
}

#[test]
fn long_comments() -> Result<()> {
    init_logging();
    // Long enough to put the EOCDR well out of reach of a short search,
    // with something that looks like another EOCDR in the middle.
    let mut comment = vec![b'#'; 60_000];
    comment[30_000..30_004].copy_from_slice(b"PK\x05\x06");

    let mut builder = ZipBuilder::new();
    builder.stored("commented", b"data").comment(&comment);
    let bytes = builder.finish();

    let archive = ZipArchive::new(&mut Cursor::new(&bytes))?;
    assert_eq!(archive.eocdr_offset(), bytes.len() as u64 - 22 - 60_000);
    assert_eq!(names(&archive, &bytes, CENTRAL_DIRECTORY_WINDOW)?, ["commented"]);
    Ok(())
}

#[test]
fn zip64_end_records() -> Result<()> {
    init_logging();
    let mut builder = ZipBuilder::new();
    builder
        .stored_zip64("a", &noise(1000, 1))
        .stored("b", b"plain")
        .zip64_end();
    let bytes = builder.finish();

    let mut cursor = Cursor::new(&bytes);
    let archive = ZipArchive::new(&mut cursor)?;
    assert!(archive.is_zip64());
    assert_eq!(archive.entry_count(), 2);

    let entries = archive
        .entries(&mut cursor)
        .collect::<ZipSplitResult<Vec<_>>>()?;
    assert_eq!(entries[0].size, 1000);
    assert_eq!(entries[0].compressed_size, 1000);
    assert_eq!(entries[0].header_offset, 0);
    assert_eq!(entries[1].compressed_size, 5);
    assert_eq!(entries[1].header_offset, builder.offsets[1]);

    // The local header's sizes are sentinels; we leave them be.
    let local = ZipArchive::read_local_header(&mut cursor, 0)?;
    assert_eq!(local.compressed_size(), u32::MAX);
    assert_eq!(local.extra_field_length(), 20);
    Ok(())
}

#[test]
fn truncated_central_directory() -> Result<()> {
    init_logging();
    let mut builder = ZipBuilder::new();
    builder.stored("a", b"a").stored("b", b"b");
    let mut bytes = builder.finish();

    // Claim a third entry that isn't there.
    let eocdr = bytes.len() - 22;
    bytes[eocdr + 8] = 3;
    bytes[eocdr + 10] = 3;

    let mut cursor = Cursor::new(&bytes);
    let archive = ZipArchive::new(&mut cursor)?;
    let results: Vec<_> = archive.entries(&mut cursor).collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok() && results[1].is_ok());
    let err = results[2].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    Ok(())
}
