//! Top-level error taxonomy tying the per-module error enums together.
//!
//! Mirrors `oxcrypt_core::error::mod`'s layering: each subsystem owns its
//! own `thiserror` enum, and this module re-exports them behind one
//! `RaidError` rather than flattening every variant into a single type.

use thiserror::Error;

pub use crate::balancer::BalancerError;
pub use crate::catalog::CatalogError;
pub use crate::cipher::CipherError;
pub use crate::download::DownloadError;
pub use crate::upload::UploadError;

/// Unifying error surface returned by `raid-core`'s public operations,
/// corresponding one-to-one with the kinds enumerated in spec.md §7.
#[derive(Debug, Error)]
pub enum RaidError {
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("unknown storage: {0}")]
    UnknownStorage(i64),

    #[error("a file named {0:?} is already tracked")]
    FileAlreadyExists(String),

    #[error("a key named {0:?} is already tracked")]
    KeyAlreadyExists(String),

    /// The operation was cancelled by the caller (e.g. Ctrl-C) before it
    /// could complete; any partially-uploaded blocks remain in the
    /// catalog for a later resume, per spec.md §4.4's cancellation note.
    #[error("action cancelled")]
    CancelAction,

    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}
