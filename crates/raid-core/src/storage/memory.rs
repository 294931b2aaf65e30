//! In-memory [`Storage`] backend used by the engine test suite.
//!
//! Mirrors the shape of a real adapter closely enough that the upload and
//! download engines can't tell the difference, while letting tests inject
//! failures deterministically (e.g. "the first replica of block 1 fails
//! three times", spec.md §8 scenario 4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::StorageKind;
use crate::storage::{ChunkHook, Storage, TransferOutcome, UploadOutcome, ListedObject};

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    /// Object names that should return `Failed` for the next N calls to
    /// `upload`/`download`, decremented on each attempt.
    fail_next: HashMap<String, u32>,
}

/// Thread-safe in-memory storage with capacity tracking and injectable
/// transient failures, for use in tests only.
pub struct MemoryStorage {
    total_bytes: u64,
    used_bytes: AtomicU64,
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            used_bytes: AtomicU64::new(0),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make the next `count` upload/download attempts against `name` fail.
    pub fn fail_next(&self, name: &str, count: u32) {
        self.inner
            .lock()
            .unwrap()
            .fail_next
            .insert(name.to_string(), count);
    }

    fn should_fail(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.fail_next.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> UploadOutcome {
        if self.should_fail(name) {
            return UploadOutcome::Failed;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.objects.contains_key(name) {
            return UploadOutcome::FileExists;
        }
        inner.objects.insert(name.to_string(), bytes.to_vec());
        self.used_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        UploadOutcome::Ok
    }

    async fn upload_chunked(
        &self,
        name: &str,
        bytes: &[u8],
        chunk_size: usize,
        on_chunk: ChunkHook<'_>,
    ) -> UploadOutcome {
        for chunk in super::chunks_of(bytes, chunk_size) {
            on_chunk(chunk);
        }
        self.upload(name, bytes).await
    }

    async fn download(&self, name: &str) -> (TransferOutcome, Vec<u8>) {
        if self.should_fail(name) {
            return (TransferOutcome::Failed, Vec::new());
        }
        let inner = self.inner.lock().unwrap();
        match inner.objects.get(name) {
            Some(bytes) => (TransferOutcome::Ok, bytes.clone()),
            None => (TransferOutcome::Failed, Vec::new()),
        }
    }

    async fn download_chunked(
        &self,
        name: &str,
        chunk_size: usize,
        on_chunk: ChunkHook<'_>,
    ) -> (TransferOutcome, Vec<u8>) {
        let (outcome, bytes) = self.download(name).await;
        if outcome == TransferOutcome::Ok {
            for chunk in super::chunks_of(&bytes, chunk_size) {
                on_chunk(chunk);
            }
        }
        (outcome, bytes)
    }

    async fn delete(&self, name: &str) -> TransferOutcome {
        let mut inner = self.inner.lock().unwrap();
        match inner.objects.remove(name) {
            Some(bytes) => {
                self.used_bytes.fetch_sub(bytes.len() as u64, Ordering::Relaxed);
                TransferOutcome::Ok
            }
            None => TransferOutcome::Failed,
        }
    }

    async fn list(&self) -> (TransferOutcome, Vec<ListedObject>) {
        let inner = self.inner.lock().unwrap();
        let items = inner
            .objects
            .iter()
            .map(|(name, bytes)| ListedObject {
                name: name.clone(),
                size: bytes.len() as u64,
            })
            .collect();
        (TransferOutcome::Ok, items)
    }

    async fn size(&self) -> (u64, u64) {
        (self.used_bytes.load(Ordering::Relaxed), self.total_bytes)
    }
}
