//! Domain entities for the catalog: storages, keys, files, and blocks.
//!
//! These are value types keyed by catalog-assigned integer ids — no entity
//! holds a strong reference to another, only an id. The catalog is the only
//! component that owns durable state; everything here is a transient
//! projection of a database row.

use std::fmt;

/// Closed set of storage backend kinds. The reference adapter is
/// `YandexDisk`; new variants are added as new adapter crates ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    YandexDisk,
    /// In-memory backend used by tests and local experimentation.
    Memory,
}

impl StorageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::YandexDisk => "yandex-disk",
            StorageKind::Memory => "memory",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yandex-disk" => Some(StorageKind::YandexDisk),
            "memory" => Some(StorageKind::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage credential token. `Debug` redacts the value so it never ends
/// up in a log line or panic message by accident.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StorageToken(String);

impl StorageToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageToken(<redacted, {} bytes>)", self.0.len())
    }
}

impl From<String> for StorageToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A remote bucket the balancer can place block replicas on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    pub id: i64,
    pub token: StorageToken,
    pub kind: StorageKind,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl Storage {
    /// Load metric used to order storages for heap-based assignment: the
    /// fraction of capacity already consumed. Empty/unknown capacity sorts
    /// as maximally loaded so it is picked last, never first.
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return f64::INFINITY;
        }
        self.used_bytes as f64 / self.total_bytes as f64
    }
}

/// A symmetric key record. Never deleted while a block still references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub id: i64,
    /// Opaque printable key material; implementations derive a fixed-width
    /// key from it (e.g. SHA-256 of the string for AES-256).
    pub material: String,
}

/// A logical file tracked by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub id: i64,
    pub filename: String,
    pub size: u64,
    pub total_blocks: u32,
    pub uploaded_blocks: u32,
    /// SHA-1 checksum of the plaintext, hex-encoded.
    pub checksum: String,
    pub block_size: u32,
    pub duplicate_count: u32,
    pub encrypted: bool,
}

impl File {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.uploaded_blocks == self.total_blocks
    }
}

/// One replica of one block of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: i64,
    pub file_id: i64,
    pub number: u32,
    pub duplicate_number: u32,
    /// Opaque random object-key on the remote storage.
    pub name: String,
    /// Size in bytes as stored (post-encryption).
    pub size: u64,
    pub storage_id: i64,
    pub key_id: Option<i64>,
}
