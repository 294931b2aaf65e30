//! TOML settings file for the `raid` CLI.
//!
//! Mirrors `oxcrypt/src/config.rs`'s `Config::load()` pattern: an XDG
//! config path resolved via `directories`, a `Default` impl used when the
//! file is absent, and `anyhow::Context` wrapping on parse failure. This is
//! the "configuration loader" spec.md §1 calls out of scope as a
//! *component to design*; SPEC_FULL §1.1 still asks for a real one sized
//! the way the teacher sizes its own.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Operational knobs the engines need that aren't per-invocation CLI flags:
/// concurrency, retry budget, and the balancer's block-size bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite catalog database.
    pub catalog_path: PathBuf,

    /// Ceiling on simultaneously in-flight transfer tasks per engine
    /// (spec.md §5's `parallel_num`).
    pub parallel_num: usize,

    /// Per-task retry budget before a replica is handed to the second
    /// retry pass (spec.md §4.4's `repeat_count`).
    pub repeat_count: u32,

    /// Lower bound the balancer's block-size policy uses when no explicit
    /// `-b` is given (spec.md §4.3).
    pub min_block_size: u64,

    /// Upper bound the balancer's block-size policy uses when no explicit
    /// `-b` is given.
    pub max_block_size: u64,

    /// Replicas per block when `upload` doesn't override it.
    pub duplicate_count: u32,

    /// Scratch directory `download` assembles blocks in when `--temp-dir`
    /// isn't given.
    pub temp_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            parallel_num: 4,
            repeat_count: 3,
            min_block_size: 1024 * 1024,
            max_block_size: 64 * 1024 * 1024,
            duplicate_count: 2,
            temp_dir: std::env::temp_dir().join("raid"),
        }
    }
}

impl Config {
    /// Load configuration from the default path, or fall back to
    /// [`Config::default`] if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

fn default_catalog_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "raid")
        .map(|dirs| dirs.data_dir().join("catalog.db"))
        .unwrap_or_else(|| PathBuf::from("raid-catalog.db"))
}

/// `~/.config/raid/config.toml` on Linux, the platform equivalent
/// elsewhere (via `directories::ProjectDirs`).
pub fn config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "raid")
        .context("could not determine home directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
