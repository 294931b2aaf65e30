//! Storage capability: a uniform upload/download/delete/list/capacity
//! contract that every backend adapter crate implements.
//!
//! The trait itself never returns a Rust `Err` for ordinary remote
//! failure — `upload`/`download`/`delete` report `FAILED` as a value so the
//! upload/download engines can retry in place, matching spec.md §4.1 and
//! §7 ("transient storage failures — recovered locally by retry; never
//! surfaced directly").

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::model::StorageKind;

/// Outcome of a `upload`/`upload_chunked` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Ok,
    /// The remote refused to overwrite an existing object of this name.
    FileExists,
    Failed,
}

/// Outcome of a `download`/`download_chunked`/`delete` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub name: String,
    pub size: u64,
}

/// Per-call progress callback: invoked exactly once per chunk actually
/// transferred, in order, including a final partial chunk — spec.md §9
/// flags the original implementation's omission of the final partial
/// chunk as a bug we must not reproduce.
pub type ChunkHook<'a> = &'a mut (dyn FnMut(&[u8]) + Send);

#[async_trait]
pub trait Storage: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Idempotent w.r.t. `name` on success.
    async fn upload(&self, name: &str, bytes: &[u8]) -> UploadOutcome;

    /// Same semantics as [`Storage::upload`], but the payload is handed over
    /// in `chunk_size`-sized slices so callers can observe per-chunk
    /// progress and bound memory on the wire.
    async fn upload_chunked(
        &self,
        name: &str,
        bytes: &[u8],
        chunk_size: usize,
        on_chunk: ChunkHook<'_>,
    ) -> UploadOutcome;

    async fn download(&self, name: &str) -> (TransferOutcome, Vec<u8>);

    /// Same semantics as [`Storage::download`], invoking `on_chunk` once per
    /// completed chunk received, in order, before returning.
    async fn download_chunked(
        &self,
        name: &str,
        chunk_size: usize,
        on_chunk: ChunkHook<'_>,
    ) -> (TransferOutcome, Vec<u8>);

    async fn delete(&self, name: &str) -> TransferOutcome;

    async fn list(&self) -> (TransferOutcome, Vec<ListedObject>);

    /// Latest known `(used_bytes, total_bytes)` capacity.
    async fn size(&self) -> (u64, u64);
}

/// A storage paired with its current load metric, ordered for heap use by
/// [`Balancer`](crate::balancer::Balancer). Ties break arbitrarily (by id),
/// matching spec.md §4.1's "ties broken arbitrarily".
pub struct StorageHandle {
    pub storage_id: i64,
    pub load_ratio: f64,
    pub storage: std::sync::Arc<dyn Storage>,
}

impl PartialEq for StorageHandle {
    fn eq(&self, other: &Self) -> bool {
        self.storage_id == other.storage_id
    }
}
impl Eq for StorageHandle {}

impl PartialOrd for StorageHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.load_ratio
            .partial_cmp(&other.load_ratio)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.storage_id.cmp(&other.storage_id))
    }
}

/// Split `bytes` into `chunk_size`-sized pieces, the final one possibly
/// shorter — never omitted, unlike the reference implementation's
/// `_block_by_chunk` bug documented in spec.md §9.
pub fn chunks_of(bytes: &[u8], chunk_size: usize) -> impl Iterator<Item = &[u8]> {
    assert!(chunk_size > 0, "chunk_size must be positive");
    bytes.chunks(chunk_size)
}
