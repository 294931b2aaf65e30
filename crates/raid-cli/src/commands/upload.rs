//! `raid upload <src> [<dst>] [-b <block_size>] [-e]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args as ClapArgs;
use raid_core::balancer::Balancer;
use raid_core::catalog::Catalog;
use raid_core::upload::UploadEngine;

use crate::config::Config;
use crate::context::{Backends, Ciphers};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Local file to upload.
    pub src: PathBuf,

    /// Catalog filename to upload under; defaults to `src`'s file name.
    pub dst: Option<String>,

    /// Block size override (bytes). Omit to let the balancer choose one.
    #[arg(short = 'b', long = "block-size")]
    pub block_size: Option<u64>,

    /// Encrypt every replica with a catalog-registered key.
    #[arg(short = 'e', long)]
    pub encrypt: bool,

    /// Replicas per block. Defaults to the configured `duplicate_count`.
    #[arg(short = 'd', long = "duplicate-count")]
    pub duplicate_count: Option<u32>,
}

pub async fn execute(catalog: Arc<dyn Catalog>, config: &Config, args: &Args) -> Result<()> {
    if !args.src.is_file() {
        bail!("not a file: {}", args.src.display());
    }
    let filename = match &args.dst {
        Some(name) => name.clone(),
        None => args
            .src
            .file_name()
            .context("source path has no file name")?
            .to_string_lossy()
            .into_owned(),
    };

    let backends = Backends::load(catalog.as_ref()).await?;
    let handles = backends.storage_handles(catalog.as_ref()).await?;
    if handles.is_empty() {
        bail!("no storages registered; run `raid storage add` first");
    }
    let mut balancer = Balancer::new(handles);

    let ciphers = Ciphers::load(catalog.as_ref()).await?;
    let cipher_list: Vec<_> = ciphers.all();
    if args.encrypt && cipher_list.is_empty() {
        bail!("encryption requested but no keys are registered; run `raid key add` or `raid key generate` first");
    }

    let engine = UploadEngine::new(
        Arc::clone(&catalog),
        config.parallel_num,
        config.repeat_count,
        config.min_block_size,
        config.max_block_size,
    );

    let duplicate_count = args.duplicate_count.unwrap_or(config.duplicate_count);

    let file = engine
        .upload(
            &args.src,
            &filename,
            duplicate_count,
            args.encrypt,
            &mut balancer,
            &cipher_list,
            args.block_size,
            None,
        )
        .await?;

    println!(
        "uploaded {filename:?}: {} bytes in {} block(s), {} replica(s) each",
        file.size, file.total_blocks, duplicate_count
    );
    Ok(())
}
