//! Construct live [`Storage`] trait objects from catalog credentials.
//!
//! One match arm per [`StorageKind`], mirroring how `oxcrypt-cli`'s
//! `backends` command dispatches on the compiled-in mount backend rather
//! than guessing from a string at every call site.

use std::sync::Arc;

use anyhow::{bail, Result};
use raid_core::model::{Storage as StorageRow, StorageKind, StorageToken};
use raid_core::storage::Storage;
use raid_storage_yandex::YandexDiskStorage;

/// Build a live backend from a storage kind and its credential token.
pub fn build_from(kind: StorageKind, token: &StorageToken) -> Result<Arc<dyn Storage>> {
    match kind {
        StorageKind::YandexDisk => {
            let storage = YandexDiskStorage::new(token.as_str().to_string())?;
            Ok(Arc::new(storage))
        }
        StorageKind::Memory => {
            bail!(
                "the `memory` storage kind only exists for the test suite \
                 and cannot be reconstructed outside of it"
            );
        }
    }
}

/// Build the live backend for a catalog storage row.
pub fn build(row: &StorageRow) -> Result<Arc<dyn Storage>> {
    build_from(row.kind, &row.token)
}
