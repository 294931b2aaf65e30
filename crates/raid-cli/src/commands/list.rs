//! `raid list`

use anyhow::Result;
use clap::Args as ClapArgs;
use raid_core::catalog::Catalog;

#[derive(ClapArgs, Clone)]
pub struct Args {}

pub async fn execute(catalog: &dyn Catalog, _args: &Args) -> Result<()> {
    let mut files = catalog.list_files().await?;
    files.sort_by(|a, b| a.filename.cmp(&b.filename));

    if files.is_empty() {
        println!("no files tracked");
        return Ok(());
    }

    println!("{:<32} {:>12} {:>10} {:>8}", "FILENAME", "SIZE", "BLOCKS", "STATE");
    for file in files {
        let state = if file.is_complete() { "complete" } else { "partial" };
        println!(
            "{:<32} {:>12} {:>4}/{:<4} {:>8}",
            file.filename, file.size, file.uploaded_blocks, file.total_blocks, state
        );
    }
    Ok(())
}
