//! Content hashing for deduplication.
//!
//! Every persisted photo is keyed for dedup by the SHA-256 of its
//! **full-size transcoded bytes**, not of the uploaded file. Two uploads that
//! differ only in container metadata (EXIF, file name) but transcode to the
//! same pixels therefore share one stored copy.
//!
//! Digests are lowercase hex, 64 characters. All functions are pure and hold
//! no shared state, so they can run from any number of threads at once.

use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

/// Chunk size used when streaming a reader through the hasher.
const READ_CHUNK: usize = 64 * 1024;

/// SHA-256 of an in-memory payload, returned as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of everything readable from `reader`.
///
/// Any read failure is surfaced as-is; a partially read source never yields
/// a digest.
pub fn hash_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    hash_reader(io::BufReader::new(file))
}
