//! `raid download <src> [<dst>] [--temp-dir <path>]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args as ClapArgs;
use raid_core::catalog::Catalog;
use raid_core::download::DownloadEngine;

use crate::config::Config;
use crate::context::{Backends, CatalogDownloadContext, Ciphers};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Catalog filename to fetch.
    pub src: String,

    /// Destination directory; defaults to the current directory.
    pub dst: Option<PathBuf>,

    /// Scratch directory for per-block temp files. Defaults to the
    /// configured `temp_dir`.
    #[arg(long = "temp-dir")]
    pub temp_dir: Option<PathBuf>,
}

pub async fn execute(catalog: Arc<dyn Catalog>, config: &Config, args: &Args) -> Result<()> {
    let dest_dir = args.dst.clone().unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dest_dir).await?;

    let temp_dir = args.temp_dir.clone().unwrap_or_else(|| config.temp_dir.clone());
    tokio::fs::create_dir_all(&temp_dir).await?;

    let ctx = CatalogDownloadContext {
        backends: Backends::load(catalog.as_ref()).await?,
        ciphers: Ciphers::load(catalog.as_ref()).await?,
    };

    let engine = DownloadEngine::new(Arc::clone(&catalog), config.parallel_num);
    let dest_path = engine
        .download(&args.src, &dest_dir, &temp_dir, &ctx, None)
        .await?;

    println!("downloaded {:?} to {}", args.src, dest_path.display());
    Ok(())
}
