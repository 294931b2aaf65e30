//! Exit codes for the CLI.
//!
//! Follows common Unix conventions so scripts can branch on the failure
//! class without parsing error text (SPEC_FULL §6, "Exit code 0 on
//! success; non-zero on any surfaced error").

/// Successful execution.
pub const SUCCESS: u8 = 0;

/// General/unspecified error.
pub const GENERAL_ERROR: u8 = 1;

/// Command-line usage error (bad arguments).
pub const USAGE_ERROR: u8 = 2;

/// Balancer could not find enough distinct storages (`NO_STORAGE`).
pub const NO_STORAGE: u8 = 3;

/// Catalog lookup miss (`UNKNOWN_FILE` / `UNKNOWN_STORAGE`).
pub const NOT_FOUND: u8 = 4;

/// Filename (or key material) already tracked (`FILE_ALREADY_EXISTS` /
/// `KEY_ALREADY_EXISTS`).
pub const ALREADY_EXISTS: u8 = 5;

/// Encryption requested but no cipher/key is configured (`NO_CIPHER`).
pub const NO_CIPHER: u8 = 10;

/// Reassembled file's checksum didn't match the catalog's record.
pub const CHECKSUM_MISMATCH: u8 = 6;

/// One or more block replicas stayed `DEAD` after both retry passes.
pub const UPLOAD_FAILED: u8 = 7;

/// A block's replicas were all exhausted during download.
pub const DOWNLOAD_FAILED: u8 = 8;

/// The user declined a confirmation prompt.
pub const CANCELLED: u8 = 9;

/// The catalog has no replica recorded at all for some block
/// (`CATALOG_CORRUPT`) — distinct from `DOWNLOAD_FAILED`, where replicas
/// exist but every transfer attempt failed.
pub const CATALOG_CORRUPT: u8 = 11;
