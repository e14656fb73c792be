//! Streaming copy and hashing helpers
//!
//! Everything here works through one fixed-size buffer,
//! so memory use doesn't depend on how big the data is.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

/// Size of the buffer used for all bulk copies and hashes
pub const COPY_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// A SHA-256 digest
pub type Hash = [u8; 32];

fn copy_buffer(len: u64) -> Vec<u8> {
    vec![0; len.min(COPY_BUFFER_SIZE as u64) as usize]
}

/// Feeds exactly `len` bytes from `from` to `sink`, one buffer at a time.
///
/// Running out of input early is an `UnexpectedEof` error.
fn pump<R, F>(from: &mut R, mut len: u64, mut sink: F) -> io::Result<()>
where
    R: Read + ?Sized,
    F: FnMut(&[u8]) -> io::Result<()>,
{
    let mut buf = copy_buffer(len);
    while len > 0 {
        let want = len.min(buf.len() as u64) as usize;
        let read = match from.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended {len} bytes early"),
                ))
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink(&buf[..read])?;
        len -= read as u64;
    }
    Ok(())
}

/// Copies exactly `len` bytes from `from` to `to`.
pub fn copy_exact<R, W>(from: &mut R, to: &mut W, len: u64) -> io::Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    pump(from, len, |chunk| to.write_all(chunk))
}

/// Hashes exactly the next `len` bytes of `from`.
pub fn hash_exact<R: Read + ?Sized>(from: &mut R, len: u64) -> io::Result<Hash> {
    let mut hasher = Sha256::new();
    pump(from, len, |chunk| {
        hasher.update(chunk);
        Ok(())
    })?;
    Ok(hasher.finalize().into())
}

/// A writer that hashes everything passing through it on the way to `inner`
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Returns the inner writer and the hash of everything written to it.
    pub fn finish(self) -> (W, Hash) {
        (self.inner, self.hasher.finalize().into())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn copies_exactly() {
        let data: &[u8] = b"0123456789";
        let mut from = data;
        let mut to = Vec::new();
        copy_exact(&mut from, &mut to, 4).unwrap();
        assert_eq!(to, b"0123");
        assert_eq!(from, b"456789");
    }

    #[test]
    fn short_input_is_eof() {
        let mut from: &[u8] = b"abc";
        let err = copy_exact(&mut from, &mut io::sink(), 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn hash_matches_hashing_writer() {
        let data = vec![7u8; 10_000];
        let expected: Hash = Sha256::digest(&data).into();

        let mut from = &data[..];
        assert_eq!(hash_exact(&mut from, data.len() as u64).unwrap(), expected);

        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        assert_eq!(writer.written(), 10_000);
        let (inner, hash) = writer.finish();
        assert_eq!(inner, data);
        assert_eq!(hash, expected);
    }

    #[test]
    fn zero_length_is_fine() {
        let mut from: &[u8] = b"";
        let expected: Hash = Sha256::digest(b"").into();
        assert_eq!(hash_exact(&mut from, 0).unwrap(), expected);
    }
}
