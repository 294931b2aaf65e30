//! `raid key add|generate|list`

use anyhow::Result;
use clap::{Args as ClapArgs, Subcommand};
use rand::RngCore;
use raid_core::catalog::Catalog;

#[derive(Subcommand, Clone)]
pub enum Command {
    /// Register a key from caller-supplied material.
    Add(AddArgs),
    /// Generate fresh random key material and register it.
    Generate,
    /// List registered keys (material is not printed after generation).
    List,
}

#[derive(ClapArgs, Clone)]
pub struct AddArgs {
    pub material: String,
}

pub async fn execute(catalog: &dyn Catalog, command: &Command) -> Result<()> {
    match command {
        Command::Add(args) => add(catalog, &args.material).await,
        Command::Generate => generate(catalog).await,
        Command::List => list(catalog).await,
    }
}

async fn add(catalog: &dyn Catalog, material: &str) -> Result<()> {
    // Uniqueness is enforced by the catalog itself (a `UNIQUE` constraint on
    // `key.material`), surfaced as `CatalogError::KeyAlreadyExists` on
    // conflict (spec.md §7) — no separate list-then-check race here.
    let key = catalog.create_key(material.to_string()).await?;
    println!("registered key #{}", key.id);
    Ok(())
}

async fn generate(catalog: &dyn Catalog) -> Result<()> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let material = hex::encode(bytes);

    let key = catalog.create_key(material.clone()).await?;
    println!("generated key #{}: {material}", key.id);
    println!("this material is not stored anywhere else; save it now if you need it outside the catalog");
    Ok(())
}

async fn list(catalog: &dyn Catalog) -> Result<()> {
    let keys = catalog.list_keys().await?;
    if keys.is_empty() {
        println!("no keys registered");
        return Ok(());
    }
    for key in keys {
        let preview: String = key.material.chars().take(6).collect();
        println!("#{:<4} {preview}… ({} bytes of material)", key.id, key.material.len());
    }
    Ok(())
}
