//! Streaming SHA-1 over large files.
//!
//! SHA-1 is used here purely as a content-identity checksum to detect
//! accidental corruption across the upload/download round-trip, not as a
//! security boundary — spec.md §3/§8 pin it explicitly and intentionally;
//! we don't substitute a stronger hash here even though [`crate::cipher`]
//! does deviate from the spec's literal reference cipher.

use std::io;
use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Chunk size used while streaming a file through the hasher. Large enough
/// to amortize syscall overhead, small enough to keep memory bounded.
const READ_CHUNK: usize = 64 * 1024;

/// Compute the hex-encoded SHA-1 checksum of a file's contents without
/// loading it into memory all at once.
pub async fn sha1_file(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the hex-encoded SHA-1 checksum of an in-memory buffer.
#[must_use]
pub fn sha1_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn matches_known_vector() {
        // SHA-1("abc") per FIPS 180-1 test vectors.
        assert_eq!(
            sha1_bytes(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[tokio::test]
    async fn streaming_matches_in_memory() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![7u8; READ_CHUNK * 3 + 17];
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let streamed = sha1_file(tmp.path()).await.unwrap();
        assert_eq!(streamed, sha1_bytes(&data));
    }
}
