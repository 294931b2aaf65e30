//! Download engine: fetch every block of a file from its cheapest-available
//! replica, decrypt, reassemble in order, and verify the checksum
//! (spec.md §4.5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::checksum;
use crate::cipher::{Cipher, CipherError};
use crate::progress::ProgressTracker;
use crate::storage::TransferOutcome;

const DOWNLOAD_CHUNK: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("no storage registered for id {0}")]
    UnknownStorage(i64),

    #[error("no cipher registered for key id {0}")]
    UnknownKey(i64),

    /// Every replica of block `block_number` failed; the download is
    /// abandoned rather than producing a file with a hole in it
    /// (spec.md §4.5 — "fail-fast per block group").
    #[error("block {block_number} failed on every replica")]
    BlockDownloadFailed { block_number: u32 },

    /// **[INTEGRITY VIOLATION]** The catalog has no replica recorded at all
    /// for `block_number` — e.g. an interrupted upload left a gap. Caught
    /// in pre-flight (spec.md §4.5 step 2) before any replica transfer
    /// starts, since there is nothing to fall back to.
    #[error("catalog corrupt: block {block_number} has no replicas recorded")]
    CatalogCorrupt { block_number: u32 },

    /// The reassembled file's checksum didn't match the catalog's record —
    /// an **[INTEGRITY VIOLATION]**: either local corruption during
    /// reassembly or a remote silently returned the wrong bytes.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Resolves catalog ids to the live capability objects the download engine
/// needs: a storage by id, and a cipher by key id.
pub trait DownloadContext: Send + Sync {
    fn storage(&self, storage_id: i64) -> Option<Arc<dyn crate::storage::Storage>>;
    fn cipher(&self, key_id: i64) -> Option<Arc<dyn Cipher>>;
}

pub struct DownloadEngine {
    catalog: Arc<dyn Catalog>,
    parallel_num: usize,
}

impl DownloadEngine {
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, parallel_num: usize) -> Self {
        Self { catalog, parallel_num: parallel_num.max(1) }
    }

    /// Download `filename` into `dest_dir`, writing to `<filename>` or, if
    /// that name already exists locally, `<filename>(NEW)` — matching
    /// spec.md §4.5's destination collision rule exactly (no numbered
    /// suffixes beyond the single `(NEW)` marker).
    ///
    /// Each block is decrypted into its own file under `temp_dir`, named by
    /// its catalog replica name, and released from memory immediately
    /// (spec.md §4.5, §6); the destination is assembled by concatenating
    /// those files in `block_number` order. The temp files are left on disk
    /// for the caller to clean up — this engine never deletes them.
    #[instrument(skip(self, ctx, progress), fields(filename = %filename))]
    pub async fn download(
        &self,
        filename: &str,
        dest_dir: &Path,
        temp_dir: &Path,
        ctx: &dyn DownloadContext,
        progress: Option<Arc<ProgressTracker>>,
    ) -> Result<PathBuf, DownloadError> {
        let file = self
            .catalog
            .get_file_by_name(filename)
            .await
            .map_err(|_| DownloadError::UnknownFile(filename.to_string()))?;

        let groups = self.catalog.get_blocks_grouped_by_number(file.id).await?;

        // Pre-flight (spec.md §4.5 step 2): every group must be non-empty
        // before any bytes move. A missing block number means there is no
        // replica to fall back to at all, so failing later (or silently
        // shifting every subsequent block into the wrong slot) is worse
        // than failing here.
        for (block_number, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(DownloadError::CatalogCorrupt { block_number: block_number as u32 });
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.parallel_num));
        let mut tasks = JoinSet::new();

        for (index, group) in groups.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore);
            let progress = progress.clone();
            let temp_dir = temp_dir.to_path_buf();
            let storages: Vec<_> = group
                .iter()
                .map(|b| ctx.storage(b.storage_id).ok_or(DownloadError::UnknownStorage(b.storage_id)))
                .collect::<Result<_, _>>()?;
            let ciphers: Vec<_> = group
                .iter()
                .map(|b| match b.key_id {
                    Some(key_id) => ctx.cipher(key_id).map(Some).ok_or(DownloadError::UnknownKey(key_id)),
                    None => Ok(None),
                })
                .collect::<Result<_, _>>()?;
            let group = group.clone();

            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                let block_number = group[0].number;

                for (replica, (storage, cipher)) in group.iter().zip(storages.into_iter().zip(ciphers)) {
                    let mut hook = |chunk: &[u8]| {
                        let _ = chunk;
                        if let Some(progress) = &progress {
                            progress.record_chunk(replica.number, replica.duplicate_number);
                        }
                    };
                    let (outcome, bytes) = storage
                        .download_chunked(&replica.name, DOWNLOAD_CHUNK, &mut hook)
                        .await;
                    if outcome != TransferOutcome::Ok {
                        warn!(block_number, replica = replica.duplicate_number, "replica download failed, trying next");
                        continue;
                    }

                    let plaintext = match cipher {
                        Some(cipher) => match cipher.decrypt(&bytes) {
                            Ok(pt) => pt,
                            Err(e) => {
                                warn!(error = %e, block_number, replica = replica.duplicate_number, "decryption failed, trying next");
                                continue;
                            }
                        },
                        None => bytes,
                    };

                    let temp_path = temp_dir.join(&replica.name);
                    if let Err(e) = tokio::fs::write(&temp_path, &plaintext).await {
                        warn!(error = %e, block_number, "failed to write decrypted block to temp dir");
                        return Err(DownloadError::Io(e));
                    }
                    drop(plaintext);

                    return Ok((index, temp_path));
                }

                Err(DownloadError::BlockDownloadFailed { block_number })
            });
        }

        let mut ordered: HashMap<usize, PathBuf> = HashMap::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok((index, temp_path))) => {
                    ordered.insert(index, temp_path);
                }
                Ok(Err(e)) => return Err(e),
                Err(join_err) => {
                    warn!(error = %join_err, "download task panicked");
                    return Err(DownloadError::Io(std::io::Error::other("download task panicked")));
                }
            }
        }

        let dest_path = pick_destination(dest_dir, filename);
        let mut out = tokio::fs::File::create(&dest_path).await?;
        for index in 0..ordered.len() {
            let block_path = ordered.remove(&index).expect("every index was populated");
            let mut block_file = tokio::fs::File::open(&block_path).await?;
            tokio::io::copy(&mut block_file, &mut out).await?;
        }
        out.flush().await?;
        drop(out);

        let actual = checksum::sha1_file(&dest_path).await?;
        if actual != file.checksum {
            return Err(DownloadError::ChecksumMismatch { expected: file.checksum, actual });
        }

        Ok(dest_path)
    }
}

/// `<dir>/<filename>` if nothing occupies that path locally, else
/// `<dir>/<filename>(NEW)` (spec.md §4.5).
fn pick_destination(dir: &Path, filename: &str) -> PathBuf {
    let plain = dir.join(filename);
    if plain.exists() {
        dir.join(format!("{filename}(NEW)"))
    } else {
        plain
    }
}
