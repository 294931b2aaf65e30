//! `raid storage add|list|files|delete|wipe`

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Subcommand};
use raid_core::catalog::Catalog;
use raid_core::model::{StorageKind, StorageToken};
use raid_core::storage::TransferOutcome;
use tracing::warn;

use crate::backends;

#[derive(Subcommand, Clone)]
pub enum Command {
    /// Register a new storage backend.
    Add(AddArgs),
    /// List registered storages and their recorded capacity.
    List,
    /// List the remote objects held on one storage.
    Files(StorageIdArgs),
    /// Delete specific named objects from one storage.
    Delete(DeleteArgs),
    /// Delete every object on one storage, then drop the storage row.
    Wipe(StorageIdArgs),
}

#[derive(ClapArgs, Clone)]
pub struct AddArgs {
    /// Backend kind (currently only `yandex-disk`).
    pub kind: String,
    /// OAuth token / credential for the backend.
    pub token: String,
}

#[derive(ClapArgs, Clone)]
pub struct StorageIdArgs {
    pub id: i64,
}

#[derive(ClapArgs, Clone)]
pub struct DeleteArgs {
    pub id: i64,
    pub names: Vec<String>,
}

pub async fn execute(catalog: &dyn Catalog, command: &Command) -> Result<()> {
    match command {
        Command::Add(args) => add(catalog, args).await,
        Command::List => list(catalog).await,
        Command::Files(args) => files(catalog, args).await,
        Command::Delete(args) => delete(catalog, args).await,
        Command::Wipe(args) => wipe(catalog, args).await,
    }
}

async fn add(catalog: &dyn Catalog, args: &AddArgs) -> Result<()> {
    let kind = StorageKind::parse(&args.kind)
        .with_context(|| format!("unknown storage kind {:?} (expected \"yandex-disk\")", args.kind))?;
    let token = StorageToken::new(args.token.clone());

    let backend = backends::build_from(kind, &token)?;
    let (used, total) = backend.size().await;

    let storage = catalog.create_storage(token, kind, total).await?;
    catalog.refresh_capacity(storage.id, used, total).await?;

    println!("registered storage #{} ({kind}), {used}/{total} bytes used", storage.id);
    Ok(())
}

async fn list(catalog: &dyn Catalog) -> Result<()> {
    let storages = catalog.list_storages().await?;
    if storages.is_empty() {
        println!("no storages registered");
        return Ok(());
    }

    println!("{:>4} {:<14} {:>14} {:>14}", "ID", "KIND", "USED", "TOTAL");
    for storage in storages {
        println!("{:>4} {:<14} {:>14} {:>14}", storage.id, storage.kind, storage.used_bytes, storage.total_bytes);
    }
    Ok(())
}

async fn files(catalog: &dyn Catalog, args: &StorageIdArgs) -> Result<()> {
    let row = catalog.get_storage(args.id).await?;
    let backend = backends::build(&row)?;
    let (outcome, items) = backend.list().await;
    if outcome != TransferOutcome::Ok {
        bail!("listing storage #{} failed", args.id);
    }

    if items.is_empty() {
        println!("no objects on storage #{}", args.id);
        return Ok(());
    }
    for item in items {
        println!("{:<40} {:>12}", item.name, item.size);
    }
    Ok(())
}

async fn delete(catalog: &dyn Catalog, args: &DeleteArgs) -> Result<()> {
    let row = catalog.get_storage(args.id).await?;
    let backend = backends::build(&row)?;

    for name in &args.names {
        let outcome = backend.delete(name).await;
        if outcome != TransferOutcome::Ok {
            warn!(storage_id = args.id, name, "remote delete failed");
        }

        for file in catalog.list_files().await? {
            for block in catalog.get_blocks_by_file(file.id).await? {
                if block.storage_id == args.id && block.name == *name {
                    catalog.delete_block(block.id).await?;
                }
            }
        }
    }

    println!("deleted {} object(s) from storage #{}", args.names.len(), args.id);
    Ok(())
}

async fn wipe(catalog: &dyn Catalog, args: &StorageIdArgs) -> Result<()> {
    let row = catalog.get_storage(args.id).await?;
    let backend = backends::build(&row)?;

    let (outcome, items) = backend.list().await;
    if outcome != TransferOutcome::Ok {
        bail!("listing storage #{} before wipe failed", args.id);
    }

    for item in &items {
        let outcome = backend.delete(&item.name).await;
        if outcome != TransferOutcome::Ok {
            warn!(storage_id = args.id, name = item.name, "remote delete failed during wipe");
        }
    }

    for file in catalog.list_files().await? {
        for block in catalog.get_blocks_by_file(file.id).await? {
            if block.storage_id == args.id {
                catalog.delete_block(block.id).await?;
            }
        }
    }

    catalog.delete_storage(args.id).await?;
    println!("wiped storage #{} ({} object(s) removed)", args.id, items.len());
    Ok(())
}
