//! Upload engine: split a local file into blocks, replicate each block
//! across `duplicate_count` storages, and record the placement in the
//! catalog (spec.md §4.4).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::balancer::{Balancer, BalancerError};
use crate::catalog::{Catalog, CatalogError};
use crate::checksum;
use crate::cipher::{Cipher, CipherError};
use crate::model::File;
use crate::progress::ProgressTracker;
use crate::storage::UploadOutcome;

/// Chunk size used for the `upload_chunked` progress callback. Not to be
/// confused with the block size the balancer computes; this only bounds
/// how much plaintext is buffered per wire write.
const UPLOAD_CHUNK: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("a file named {0:?} is already tracked")]
    FileAlreadyExists(String),

    /// One or more block replicas never succeeded after both retry passes.
    /// The file row and any successfully-uploaded replicas remain in the
    /// catalog for a later resumed upload (spec.md §4.4).
    #[error("{} block replica upload(s) failed after retries", .0.len())]
    UploadFailed(Vec<FailedReplica>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedReplica {
    pub block_number: u32,
    pub duplicate_number: u32,
}

/// One block replica still owed to the catalog, produced by the planning
/// pass before any bytes move.
struct PlannedReplica {
    block_number: u32,
    duplicate_number: u32,
    storage_id: i64,
    storage: Arc<dyn crate::storage::Storage>,
    cipher: Option<Arc<dyn Cipher>>,
    name: String,
}

pub struct UploadEngine {
    catalog: Arc<dyn Catalog>,
    /// Upper bound on concurrently in-flight replica transfers.
    parallel_num: usize,
    /// Per-task retry budget before a replica is handed to the second
    /// retry pass.
    repeat_count: u32,
    min_block_size: u64,
    max_block_size: u64,
}

impl UploadEngine {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        parallel_num: usize,
        repeat_count: u32,
        min_block_size: u64,
        max_block_size: u64,
    ) -> Self {
        Self {
            catalog,
            parallel_num: parallel_num.max(1),
            repeat_count: repeat_count.max(1),
            min_block_size,
            max_block_size,
        }
    }

    /// Upload `path` under `filename`, replicating each block across
    /// `duplicate_count` distinct storages drawn from `balancer`, optionally
    /// encrypting each replica with a cipher `balancer` assigns from
    /// `ciphers`.
    ///
    /// If a file of this name already exists in the catalog and is
    /// complete with a matching checksum, this fails with
    /// [`UploadError::FileAlreadyExists`]. If it exists but is incomplete
    /// (a previous attempt was interrupted), the upload *resumes*: the
    /// existing file id, block size, and duplicate count are adopted, and
    /// any `(block_number, duplicate_number)` already persisted in the
    /// catalog is skipped rather than re-uploaded (spec.md §4.4).
    #[instrument(skip(self, balancer, ciphers, progress), fields(filename = %filename))]
    #[allow(clippy::too_many_arguments)]
    pub async fn upload(
        &self,
        path: &Path,
        filename: &str,
        duplicate_count: u32,
        encrypted: bool,
        balancer: &mut Balancer,
        ciphers: &[Arc<dyn Cipher>],
        requested_block_size: Option<u64>,
        progress: Option<Arc<ProgressTracker>>,
    ) -> Result<File, UploadError> {
        let metadata = tokio::fs::metadata(path).await?;
        let file_size = metadata.len();
        let checksum = checksum::sha1_file(path).await?;

        let (file, already_persisted) = match self.catalog.get_file_by_name(filename).await {
            Ok(existing) if existing.is_complete() && existing.checksum == checksum => {
                return Err(UploadError::FileAlreadyExists(filename.to_string()));
            }
            Ok(existing) => {
                warn!(filename, uploaded = existing.uploaded_blocks, total = existing.total_blocks, "resuming incomplete upload");
                let groups = self.catalog.get_blocks_grouped_by_number(existing.id).await?;
                let persisted: HashSet<(u32, u32)> = groups
                    .iter()
                    .flatten()
                    .map(|b| (b.number, b.duplicate_number))
                    .collect();
                (existing, persisted)
            }
            Err(_) => {
                let block_size = Balancer::choose_block_size(
                    requested_block_size,
                    file_size,
                    self.min_block_size,
                    self.max_block_size,
                );
                let total_blocks = Balancer::total_blocks(file_size, block_size);
                let file = self
                    .catalog
                    .create_file(
                        filename.to_string(),
                        file_size,
                        total_blocks,
                        checksum,
                        block_size as u32,
                        duplicate_count,
                        encrypted,
                    )
                    .await?;
                (file, HashSet::new())
            }
        };

        let block_size = u64::from(file.block_size);
        let total_blocks = file.total_blocks;

        let mut plan = Vec::new();
        for block_number in 0..total_blocks {
            let assigned = balancer.assign_storages(duplicate_count)?;
            for (duplicate_number, (storage_id, storage)) in assigned.into_iter().enumerate() {
                let duplicate_number = duplicate_number as u32;
                if already_persisted.contains(&(block_number, duplicate_number)) {
                    continue;
                }
                let cipher = if encrypted {
                    Some(Balancer::assign_cipher(ciphers)?)
                } else {
                    None
                };
                plan.push(PlannedReplica {
                    block_number,
                    duplicate_number,
                    storage_id,
                    storage,
                    cipher,
                    name: Balancer::fresh_name(),
                });
            }
        }

        let failed = self
            .run_plan(path, &file, block_size, &plan, progress.clone())
            .await?;
        let failed = if failed.is_empty() {
            failed
        } else {
            warn!(count = failed.len(), "retrying failed replicas once more");
            let retry_plan: Vec<&PlannedReplica> = plan
                .iter()
                .filter(|r| failed.iter().any(|f| f.block_number == r.block_number && f.duplicate_number == r.duplicate_number))
                .collect();
            self.run_plan_refs(path, &file, block_size, &retry_plan, progress)
                .await?
        };

        if !failed.is_empty() {
            return Err(UploadError::UploadFailed(failed));
        }

        self.catalog
            .get_file_by_name(filename)
            .await
            .map_err(UploadError::from)
    }

    async fn run_plan(
        &self,
        path: &Path,
        file: &File,
        block_size: u64,
        plan: &[PlannedReplica],
        progress: Option<Arc<ProgressTracker>>,
    ) -> Result<Vec<FailedReplica>, UploadError> {
        let refs: Vec<&PlannedReplica> = plan.iter().collect();
        self.run_plan_refs(path, file, block_size, &refs, progress).await
    }

    async fn run_plan_refs(
        &self,
        path: &Path,
        file: &File,
        block_size: u64,
        plan: &[&PlannedReplica],
        progress: Option<Arc<ProgressTracker>>,
    ) -> Result<Vec<FailedReplica>, UploadError> {
        let semaphore = Arc::new(Semaphore::new(self.parallel_num));
        let mut tasks = JoinSet::new();

        for replica in plan {
            let permit = Arc::clone(&semaphore);
            let path = path.to_path_buf();
            let file_id = file.id;
            let block_number = replica.block_number;
            let duplicate_number = replica.duplicate_number;
            let storage_id = replica.storage_id;
            let storage = Arc::clone(&replica.storage);
            let cipher = replica.cipher.clone();
            let name = replica.name.clone();
            let catalog = Arc::clone(&self.catalog);
            let repeat_count = self.repeat_count;
            let progress = progress.clone();

            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");

                let plaintext = match read_block(&path, block_number as u64 * block_size, block_size).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, block_number, duplicate_number, "failed to read local block");
                        return Err(FailedReplica { block_number, duplicate_number });
                    }
                };

                let payload = match &cipher {
                    Some(cipher) => match cipher.encrypt(&plaintext) {
                        Ok(ct) => ct,
                        Err(e) => {
                            warn!(error = %e, block_number, duplicate_number, "encryption failed");
                            return Err(FailedReplica { block_number, duplicate_number });
                        }
                    },
                    None => plaintext,
                };

                for attempt in 0..repeat_count {
                    let mut hook = |chunk: &[u8]| {
                        let _ = chunk;
                        if let Some(progress) = &progress {
                            progress.record_chunk(block_number, duplicate_number);
                        }
                    };
                    let outcome = storage
                        .upload_chunked(&name, &payload, UPLOAD_CHUNK, &mut hook)
                        .await;

                    match outcome {
                        UploadOutcome::Ok => {
                            let key_id = cipher.as_ref().map(|c| c.key().id);
                            if let Err(e) = catalog
                                .add_block(file_id, block_number, duplicate_number, name.clone(), payload.len() as u64, storage_id, key_id)
                                .await
                            {
                                warn!(error = %e, block_number, duplicate_number, "failed to record uploaded block");
                                return Err(FailedReplica { block_number, duplicate_number });
                            }
                            return Ok(());
                        }
                        UploadOutcome::FileExists => {
                            // Another process/run already placed this name; treat as success.
                            return Ok(());
                        }
                        UploadOutcome::Failed => {
                            warn!(attempt, block_number, duplicate_number, "upload attempt failed, retrying");
                        }
                    }
                }

                Err(FailedReplica { block_number, duplicate_number })
            });
        }

        let mut failed = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(f)) => failed.push(f),
                Err(join_err) => {
                    warn!(error = %join_err, "upload task panicked");
                }
            }
        }
        Ok(failed)
    }
}

async fn read_block(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    let mut read_total = 0usize;
    while read_total < buf.len() {
        let n = file.read(&mut buf[read_total..]).await?;
        if n == 0 {
            break;
        }
        read_total += n;
    }
    buf.truncate(read_total);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::model::{StorageKind, StorageToken};
    use crate::storage::{MemoryStorage, StorageHandle};

    async fn temp_catalog() -> (Arc<dyn Catalog>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SqliteCatalog::open(dir.path().join("catalog.db")).await.unwrap();
        (Arc::new(catalog), dir)
    }

    async fn write_temp_file(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        tokio::fs::write(&path, bytes).await.unwrap();
        (dir, path)
    }

    /// spec.md §8 end-to-end scenario 1: single storage, no encryption,
    /// block_size=16, 22-byte input -> 2 blocks, both on storage #1.
    #[tokio::test]
    async fn uploads_every_block_with_one_storage() {
        let (catalog, _cat_dir) = temp_catalog().await;
        let storage = catalog
            .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
            .await
            .unwrap();
        let backend = Arc::new(MemoryStorage::new(1_000_000));

        let (_input_dir, path) = write_temp_file(b"abcdefghijklmnopqrstuv").await;

        let engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 16, 16);
        let mut balancer = Balancer::new(vec![StorageHandle {
            storage_id: storage.id,
            load_ratio: 0.0,
            storage: backend,
        }]);

        let file = engine
            .upload(&path, "f.bin", 1, false, &mut balancer, &[], Some(16), None)
            .await
            .unwrap();

        assert_eq!(file.total_blocks, 2);
        assert_eq!(file.uploaded_blocks, 2);
    }

    /// spec.md §8 end-to-end scenario 3: a 1 MiB file in 256 KiB blocks is
    /// killed after 2 successful commits; re-running uploads only the
    /// remaining blocks.
    #[tokio::test]
    async fn resume_skips_already_persisted_replicas() {
        let (catalog, _cat_dir) = temp_catalog().await;
        let storage = catalog
            .create_storage(StorageToken::new("tok"), StorageKind::Memory, 10_000_000)
            .await
            .unwrap();
        let backend = Arc::new(MemoryStorage::new(10_000_000));

        let data = vec![7u8; 1024 * 1024];
        let (_input_dir, path) = write_temp_file(&data).await;

        let file = catalog
            .create_file(
                "big.bin".into(),
                data.len() as u64,
                4,
                checksum::sha1_bytes(&data),
                256 * 1024,
                1,
                false,
            )
            .await
            .unwrap();

        catalog.add_block(file.id, 0, 0, "n0".into(), 256 * 1024, storage.id, None).await.unwrap();
        catalog.add_block(file.id, 1, 0, "n1".into(), 256 * 1024, storage.id, None).await.unwrap();
        backend.upload("n0", &data[0..256 * 1024]).await;
        backend.upload("n1", &data[256 * 1024..512 * 1024]).await;

        let engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 1024, 1024 * 1024);
        let mut balancer = Balancer::new(vec![StorageHandle {
            storage_id: storage.id,
            load_ratio: 0.0,
            storage: Arc::clone(&backend),
        }]);

        let resumed = engine
            .upload(&path, "big.bin", 1, false, &mut balancer, &[], None, None)
            .await
            .unwrap();

        assert_eq!(resumed.uploaded_blocks, 4);
        assert_eq!(resumed.total_blocks, 4);

        let (_, listed) = backend.list().await;
        assert_eq!(listed.len(), 4);
    }

    #[tokio::test]
    async fn re_uploading_a_complete_file_fails() {
        let (catalog, _cat_dir) = temp_catalog().await;
        let storage = catalog
            .create_storage(StorageToken::new("tok"), StorageKind::Memory, 1_000_000)
            .await
            .unwrap();
        let backend = Arc::new(MemoryStorage::new(1_000_000));
        let (_input_dir, path) = write_temp_file(b"hello world").await;

        let engine = UploadEngine::new(Arc::clone(&catalog), 4, 3, 16, 16);
        let mut balancer = Balancer::new(vec![StorageHandle {
            storage_id: storage.id,
            load_ratio: 0.0,
            storage: backend,
        }]);

        engine
            .upload(&path, "dup.bin", 1, false, &mut balancer, &[], Some(16), None)
            .await
            .unwrap();

        let err = engine
            .upload(&path, "dup.bin", 1, false, &mut balancer, &[], Some(16), None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FileAlreadyExists(_)));
    }
}
