//! Catalog capability: the durable record of storages, keys, files, and
//! blocks, and the only component in `raid-core` that owns durable state
//! (spec.md §4.6).

mod sqlite;

pub use sqlite::SqliteCatalog;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Block, File, Key, Storage, StorageKind, StorageToken};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The background catalog task is gone — the process is shutting down
    /// or a prior panic took it out; callers should treat this the same as
    /// a fatal I/O error.
    #[error("catalog actor is no longer running")]
    ActorGone,

    #[error("unknown storage id {0}")]
    UnknownStorage(i64),

    #[error("unknown file id {0}")]
    UnknownFile(i64),

    #[error("unknown file named {0:?}")]
    UnknownFileName(String),

    #[error("unknown key id {0}")]
    UnknownKey(i64),

    #[error("a file named {0:?} already exists")]
    FileAlreadyExists(String),

    #[error("a key with this material is already tracked")]
    KeyAlreadyExists,
}

/// One violation surfaced by [`Catalog::verify_invariants`]: a human-readable
/// description of a row (or group of rows) that breaks one of the catalog's
/// structural invariants from spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation(pub String);

/// Durable store of storages, keys, files, and blocks.
///
/// Implementations may serialize access internally (spec.md §5: the
/// backing connection is owned by a single task); callers never need to
/// hold a lock themselves.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn create_storage(
        &self,
        token: StorageToken,
        kind: StorageKind,
        total_bytes: u64,
    ) -> Result<Storage, CatalogError>;

    async fn list_storages(&self) -> Result<Vec<Storage>, CatalogError>;

    async fn get_storage(&self, id: i64) -> Result<Storage, CatalogError>;

    async fn delete_storage(&self, id: i64) -> Result<(), CatalogError>;

    /// Persist freshly-observed `(used_bytes, total_bytes)` for a storage,
    /// so the balancer's heap keys reflect the current run rather than the
    /// values recorded at `create_storage` time (SPEC_FULL §4.6 addition).
    async fn refresh_capacity(
        &self,
        id: i64,
        used_bytes: u64,
        total_bytes: u64,
    ) -> Result<(), CatalogError>;

    async fn create_key(&self, material: String) -> Result<Key, CatalogError>;

    async fn list_keys(&self) -> Result<Vec<Key>, CatalogError>;

    async fn get_key(&self, id: i64) -> Result<Key, CatalogError>;

    #[allow(clippy::too_many_arguments)]
    async fn create_file(
        &self,
        filename: String,
        size: u64,
        total_blocks: u32,
        checksum: String,
        block_size: u32,
        duplicate_count: u32,
        encrypted: bool,
    ) -> Result<File, CatalogError>;

    async fn get_file_by_name(&self, filename: &str) -> Result<File, CatalogError>;

    async fn list_files(&self) -> Result<Vec<File>, CatalogError>;

    async fn delete_file(&self, id: i64) -> Result<(), CatalogError>;

    /// Record one uploaded block replica and bump the owning file's
    /// `uploaded_blocks` counter in the same transaction, so a concurrent
    /// reader never observes one without the other.
    #[allow(clippy::too_many_arguments)]
    async fn add_block(
        &self,
        file_id: i64,
        number: u32,
        duplicate_number: u32,
        name: String,
        size: u64,
        storage_id: i64,
        key_id: Option<i64>,
    ) -> Result<Block, CatalogError>;

    async fn get_blocks_by_file(&self, file_id: i64) -> Result<Vec<Block>, CatalogError>;

    /// Blocks of `file_id` grouped by block number: a dense sequence of
    /// exactly `file.total_blocks` elements where element `i` holds every
    /// replica of block `i` (any stable order), ready for the download
    /// engine's replica-fallback loop. A block number with no persisted
    /// replica — e.g. left behind by an interrupted upload — comes back as
    /// an *empty* inner vector at its index rather than a vanished slot,
    /// so callers can detect the gap instead of mis-ordering around it.
    async fn get_blocks_grouped_by_number(
        &self,
        file_id: i64,
    ) -> Result<Vec<Vec<Block>>, CatalogError>;

    /// Delete a single block replica, e.g. after a failed upload retry
    /// exhausts its attempts and the engine gives up on that replica.
    async fn delete_block(&self, id: i64) -> Result<(), CatalogError>;

    /// Sweep for rows that violate the structural invariants of spec.md
    /// §3 (e.g. `uploaded_blocks > total_blocks`, a key referenced by an
    /// unencrypted file, two replicas of one block sharing a storage).
    /// Never panics; returns what it finds.
    async fn verify_invariants(&self) -> Result<Vec<InvariantViolation>, CatalogError>;
}
