use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};

use anyhow::{anyhow, bail, ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use structopt::*;
use walkdir::WalkDir;

use zipsplit::receipt::{ReceiptReader, ReceiptWriter};
use zipsplit::split::{self, SplitSummary};
use zipsplit::store::*;

/// Marks the top of a repository; the chunk store lives inside it.
const REPOSITORY_DIR: &str = "ZipSplitData";
const CHUNKS_DIR: &str = "Chunks";
const RECEIPT_EXTENSION: &str = "ZipSplit";
const TEMP_RECEIPT_EXTENSION: &str = "ZipSplit.Tmp";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zipsplit",
    about = "Replaces ZIP files with receipts, sharing large entries between them"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Creates an empty repository in the given directory.
    #[structopt(name = "newrepo")]
    NewRepo {
        #[structopt(name("directory"))]
        directory: Utf8PathBuf,
    },

    /// Writes a receipt next to each given ZIP file, moving its large entries
    /// into the repository above it.
    Add {
        /// Look for ZIP files in subdirectories too.
        #[structopt(short, long)]
        recursive: bool,

        /// Only report how much space splitting would save.
        #[structopt(long)]
        estimate_only: bool,

        /// Skip ZIP files smaller than this many bytes.
        #[structopt(long, default_value = "16777216")]
        min_size: u64,

        #[structopt(name("ZIP files or directories"), required = true)]
        paths: Vec<Utf8PathBuf>,
    },

    /// Checks that receipts restore to exactly what they were split from.
    Verify {
        /// Look for receipts in subdirectories too.
        #[structopt(short, long)]
        recursive: bool,

        #[structopt(name("receipts or directories"), required = true)]
        paths: Vec<Utf8PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    match args.command {
        Command::NewRepo { directory } => new_repository(&directory),
        Command::Add {
            recursive,
            estimate_only,
            min_size,
            paths,
        } => {
            let zips = find_files(&paths, recursive, "zip")?;
            let zips = skip_unwanted(zips, min_size)?;
            if estimate_only {
                estimate(&zips)
            } else {
                add(&zips)
            }
        }
        Command::Verify { recursive, paths } => {
            let receipts = find_files(&paths, recursive, RECEIPT_EXTENSION)?;
            verify(&receipts)
        }
    }
}

fn new_repository(directory: &Utf8Path) -> Result<()> {
    let repository = directory.join(REPOSITORY_DIR);
    ensure!(!repository.exists(), "{} already has a repository", directory);
    DiskChunkStore::init(repository.join(CHUNKS_DIR))
        .with_context(|| format!("Couldn't create a repository in {}", directory))?;
    println!("Created {}", repository);
    Ok(())
}

/// Finds the chunk store of the repository `start` is in,
/// looking in each of its parent directories.
fn find_repository(start: &Utf8Path) -> Result<Utf8PathBuf> {
    let start = start
        .canonicalize_utf8()
        .with_context(|| format!("Couldn't resolve {}", start))?;
    for dir in start.ancestors() {
        let candidate = dir.join(REPOSITORY_DIR);
        if candidate.is_dir() {
            debug!("Found repository {}", candidate);
            return Ok(candidate.join(CHUNKS_DIR));
        }
    }
    bail!(
        "{} isn't in a repository (no {} directory above it)",
        start,
        REPOSITORY_DIR
    )
}

/// Sorts files by the chunk store of the repository each one is in.
///
/// Files outside of any repository are logged and counted as failures.
fn group_by_repository(
    files: &[Utf8PathBuf],
) -> (BTreeMap<Utf8PathBuf, Vec<Utf8PathBuf>>, usize) {
    let mut repositories: BTreeMap<Utf8PathBuf, Vec<Utf8PathBuf>> = BTreeMap::new();
    let mut failures = 0;
    for file in files {
        match find_repository(file) {
            Ok(root) => repositories.entry(root).or_default().push(file.clone()),
            Err(e) => {
                error!("{:#}", e);
                failures += 1;
            }
        }
    }
    (repositories, failures)
}

fn has_extension(path: &Utf8Path, extension: &str) -> bool {
    path.extension()
        .map_or(false, |e| e.eq_ignore_ascii_case(extension))
}

/// Expands the given paths into the files with the given extension,
/// searching directories (and their subdirectories, if `recursive`).
fn find_files(
    paths: &[Utf8PathBuf],
    recursive: bool,
    extension: &str,
) -> Result<Vec<Utf8PathBuf>> {
    let mut found = Vec::new();
    for path in paths {
        if !path.is_dir() {
            found.push(path.clone());
            continue;
        }
        let walk = WalkDir::new(path)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();
        for entry in walk {
            let entry = entry.with_context(|| format!("Couldn't search {}", path))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file = Utf8PathBuf::from_path_buf(entry.into_path())
                .map_err(|p| anyhow!("{} isn't UTF-8", p.display()))?;
            if has_extension(&file, extension) {
                found.push(file);
            }
        }
    }
    Ok(found)
}

fn receipt_path(zip: &Utf8Path) -> Utf8PathBuf {
    format!("{}.{}", zip, RECEIPT_EXTENSION).into()
}

fn temp_receipt_path(zip: &Utf8Path) -> Utf8PathBuf {
    format!("{}.{}", zip, TEMP_RECEIPT_EXTENSION).into()
}

/// Drops ZIP files that already have receipts or are too small to bother with.
fn skip_unwanted(zips: Vec<Utf8PathBuf>, min_size: u64) -> Result<Vec<Utf8PathBuf>> {
    let mut wanted = Vec::with_capacity(zips.len());
    for zip in zips {
        if receipt_path(&zip).exists() {
            info!("Skipping {} (already has a receipt)", zip);
            continue;
        }
        let size = fs::metadata(&zip)
            .with_context(|| format!("Couldn't stat {}", zip))?
            .len();
        if size < min_size {
            info!("Skipping {} ({} bytes is under {})", zip, size, min_size);
            continue;
        }
        wanted.push(zip);
    }
    Ok(wanted)
}

fn estimate(zips: &[Utf8PathBuf]) -> Result<()> {
    let mut store = ChunkStoreEstimator::new();
    let mut total = SplitSummary::default();
    let mut failures = 0;
    for zip in zips {
        match split::estimate_file(zip, &mut store) {
            Ok(summary) => {
                println!(
                    "{}: {} bytes -> {} byte receipt + {} new chunk bytes",
                    zip, summary.source_size, summary.receipt_size, summary.new_chunk_bytes
                );
                total.source_size += summary.source_size;
                total.receipt_size += summary.receipt_size;
                total.new_chunk_bytes += summary.new_chunk_bytes;
            }
            Err(e) => {
                error!("{}: {}", zip, e);
                failures += 1;
            }
        }
    }
    println!(
        "{} archives, {} bytes -> {} bytes of receipts + {} bytes of chunks ({} saved)",
        zips.len() - failures,
        total.source_size,
        total.receipt_size,
        total.new_chunk_bytes,
        total.saved_bytes()
    );
    ensure!(failures == 0, "{} of {} archives failed", failures, zips.len());
    Ok(())
}

fn add(zips: &[Utf8PathBuf]) -> Result<()> {
    let (repositories, mut failures) = group_by_repository(zips);
    for (root, zips) in &repositories {
        match add_to_repository(root, zips) {
            Ok(failed) => failures += failed,
            Err(e) => {
                error!("{:#}", e);
                failures += zips.len();
            }
        }
    }
    ensure!(failures == 0, "{} of {} archives failed", failures, zips.len());
    Ok(())
}

/// Splits each of `zips` into the chunk store at `root`,
/// returning how many of them failed.
fn add_to_repository(root: &Utf8Path, zips: &[Utf8PathBuf]) -> Result<usize> {
    let mut store = DiskChunkStore::open(root, OpenMode::ReadWrite)
        .with_context(|| format!("Couldn't open {} for writing", root))?;

    let mut failures = 0;
    for zip in zips {
        let temp = temp_receipt_path(zip);
        match add_one(zip, &temp, &mut store) {
            Ok(summary) => println!(
                "{}: {} bytes -> {} byte receipt ({} bytes shared)",
                zip, summary.source_size, summary.receipt_size, summary.shared_bytes
            ),
            Err(e) => {
                error!("{}: {:#}", zip, e);
                failures += 1;
                // No receipt names this archive, so neither should the index.
                store.discard_unflushed();
                if let Err(e) = fs::remove_file(&temp) {
                    warn!("Couldn't remove {}: {}", temp, e);
                }
            }
        }
    }
    info!(
        "Added {} new chunks ({} bytes) to {}",
        store.added_chunks(),
        store.added_bytes(),
        root
    );
    Ok(failures)
}

fn add_one(zip: &Utf8Path, temp: &Utf8Path, store: &mut DiskChunkStore) -> Result<SplitSummary> {
    let file = File::create(temp).with_context(|| format!("Couldn't create {}", temp))?;
    let mut receipt = ReceiptWriter::new(BufWriter::new(file));
    let summary = split::split_file(zip, &mut receipt, store)?;

    let mut writer = receipt.into_inner();
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    // The receipt can't be trusted until everything it references is on disk.
    store.flush().context("Couldn't save the chunk store's index")?;
    fs::rename(temp, receipt_path(zip))
        .with_context(|| format!("Couldn't rename {}", temp))?;
    Ok(summary)
}

fn verify(receipts: &[Utf8PathBuf]) -> Result<()> {
    let (repositories, mut failures) = group_by_repository(receipts);
    for (root, receipts) in &repositories {
        match verify_in_repository(root, receipts) {
            Ok(failed) => failures += failed,
            Err(e) => {
                error!("{:#}", e);
                failures += receipts.len();
            }
        }
    }
    println!(
        "Verified {} receipts: {} OK, {} failed",
        receipts.len(),
        receipts.len() - failures,
        failures
    );
    ensure!(failures == 0, "{} receipts failed verification", failures);
    Ok(())
}

/// Checks each of `receipts` against the chunk store at `root`,
/// returning how many of them failed.
fn verify_in_repository(root: &Utf8Path, receipts: &[Utf8PathBuf]) -> Result<usize> {
    let store = DiskChunkStore::open(root, OpenMode::ReadOnly)
        .with_context(|| format!("Couldn't open {}", root))?;

    let mut failures = 0;
    for path in receipts {
        let result = File::open(path)
            .map_err(Into::into)
            .and_then(|f| ReceiptReader::new(BufReader::new(f)))
            .and_then(|mut r| split::verify_receipt(&mut r, &store));
        match result {
            Ok(header) => info!("{}: OK ({} bytes)", path, header.file_size),
            Err(e) => {
                error!("{}: {} ({:?} error)", path, e, e.kind());
                failures += 1;
            }
        }
    }
    Ok(failures)
}
