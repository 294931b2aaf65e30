//! Shared wiring between the catalog, live storage backends, and ciphers
//! that every transfer-related command needs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use raid_core::catalog::Catalog;
use raid_core::cipher::{AesGcmCipher, Cipher};
use raid_core::download::DownloadContext;
use raid_core::storage::{Storage, StorageHandle};

use crate::backends;

/// Live backends for every storage currently in the catalog, keyed by
/// catalog id — built once per command invocation and shared by the
/// balancer (for uploads) and the [`DownloadContext`] impl below (for
/// downloads).
pub struct Backends {
    by_id: HashMap<i64, Arc<dyn Storage>>,
}

impl Backends {
    pub async fn load(catalog: &dyn Catalog) -> Result<Self> {
        let mut by_id = HashMap::new();
        for row in catalog.list_storages().await? {
            let backend = backends::build(&row)?;
            by_id.insert(row.id, backend);
        }
        Ok(Self { by_id })
    }

    pub fn get(&self, storage_id: i64) -> Option<Arc<dyn Storage>> {
        self.by_id.get(&storage_id).cloned()
    }

    /// One [`StorageHandle`] per live backend, with a freshly-observed load
    /// ratio — callers refresh the catalog's recorded capacity first via
    /// [`Catalog::refresh_capacity`] so the heap keys reflect this run.
    pub async fn storage_handles(&self, catalog: &dyn Catalog) -> Result<Vec<StorageHandle>> {
        let mut handles = Vec::with_capacity(self.by_id.len());
        for row in catalog.list_storages().await? {
            let Some(storage) = self.by_id.get(&row.id) else {
                continue;
            };
            let (used, total) = storage.size().await;
            catalog.refresh_capacity(row.id, used, total).await?;
            let load_ratio = if total == 0 { f64::INFINITY } else { used as f64 / total as f64 };
            handles.push(StorageHandle {
                storage_id: row.id,
                load_ratio,
                storage: Arc::clone(storage),
            });
        }
        Ok(handles)
    }
}

/// Live ciphers for every key currently in the catalog, keyed by catalog id.
pub struct Ciphers {
    by_id: HashMap<i64, Arc<dyn Cipher>>,
}

impl Ciphers {
    pub async fn load(catalog: &dyn Catalog) -> Result<Self> {
        let mut by_id = HashMap::new();
        for key in catalog.list_keys().await? {
            let id = key.id;
            by_id.insert(id, Arc::new(AesGcmCipher::new(key)) as Arc<dyn Cipher>);
        }
        Ok(Self { by_id })
    }

    pub fn get(&self, key_id: i64) -> Option<Arc<dyn Cipher>> {
        self.by_id.get(&key_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Cipher>> {
        self.by_id.values().cloned().collect()
    }
}

/// [`DownloadContext`] backed by the loaded [`Backends`]/[`Ciphers`] maps.
pub struct CatalogDownloadContext {
    pub backends: Backends,
    pub ciphers: Ciphers,
}

impl DownloadContext for CatalogDownloadContext {
    fn storage(&self, storage_id: i64) -> Option<Arc<dyn Storage>> {
        self.backends.get(storage_id)
    }

    fn cipher(&self, key_id: i64) -> Option<Arc<dyn Cipher>> {
        self.ciphers.get(key_id)
    }
}
