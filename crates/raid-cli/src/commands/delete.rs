//! `raid delete <filename>…`

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use raid_core::catalog::Catalog;
use tracing::warn;

use crate::context::Backends;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Filenames to remove (each deletes every replica, then the file row).
    pub filenames: Vec<String>,
}

pub async fn execute(catalog: &dyn Catalog, args: &Args) -> Result<()> {
    let backends = Backends::load(catalog).await?;

    for filename in &args.filenames {
        let file = catalog
            .get_file_by_name(filename)
            .await
            .with_context(|| format!("unknown file: {filename:?}"))?;

        let blocks = catalog.get_blocks_by_file(file.id).await?;
        for block in &blocks {
            match backends.get(block.storage_id) {
                Some(storage) => {
                    let outcome = storage.delete(&block.name).await;
                    if outcome != raid_core::storage::TransferOutcome::Ok {
                        warn!(filename, block.name, "remote delete failed, removing catalog row anyway");
                    }
                }
                None => warn!(filename, storage_id = block.storage_id, "storage no longer registered"),
            }
        }

        catalog.delete_file(file.id).await?;
        println!("deleted {filename:?} ({} block replica(s))", blocks.len());
    }

    Ok(())
}
