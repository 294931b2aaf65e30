mod backends;
mod commands;
mod config;
mod context;
mod exit_code;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use raid_core::balancer::BalancerError;
use raid_core::catalog::{Catalog, CatalogError, SqliteCatalog};
use raid_core::cipher::CipherError;
use raid_core::download::DownloadError;
use raid_core::upload::UploadError;
use tracing_subscriber::EnvFilter;

use crate::commands::{check, delete, download, key, list, storage, upload};
use crate::config::Config;

/// Block-splitting, cloud-replicating file store.
#[derive(Parser)]
#[command(name = "raid")]
#[command(author, version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to an alternate config file.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a local file into blocks and replicate it across storages.
    Upload(upload::Args),
    /// Fetch a file from its cheapest-available replicas.
    Download(download::Args),
    /// List files tracked by the catalog.
    List(list::Args),
    /// Delete files and every block replica backing them.
    Delete(delete::Args),
    /// Manage registered storage backends.
    Storage {
        #[command(subcommand)]
        command: storage::Command,
    },
    /// Manage registered encryption keys.
    Key {
        #[command(subcommand)]
        command: key::Command,
    },
    /// Sweep the catalog for structural invariant violations.
    Check(check::Args),
}

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::from(exit_code::GENERAL_ERROR);
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(parent) = config.catalog_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::open(&config.catalog_path).await?);

    match cli.command {
        Commands::Upload(args) => upload::execute(catalog, &config, &args).await,
        Commands::Download(args) => download::execute(catalog, &config, &args).await,
        Commands::List(args) => list::execute(catalog.as_ref(), &args).await,
        Commands::Delete(args) => delete::execute(catalog.as_ref(), &args).await,
        Commands::Storage { command } => storage::execute(catalog.as_ref(), &command).await,
        Commands::Key { command } => key::execute(catalog.as_ref(), &command).await,
        Commands::Check(args) => check::execute(catalog.as_ref(), &args).await,
    }
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map the error taxonomy of spec.md §7 onto the process exit code, by
/// downcasting through the error chain rather than matching on message
/// text (mirrors `oxcrypt-cli::categorize_error`).
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(err) = cause.downcast_ref::<BalancerError>() {
            return match err {
                BalancerError::NoStorage { .. } => exit_code::NO_STORAGE,
                BalancerError::NoCipher => exit_code::NO_CIPHER,
            };
        }
        if let Some(err) = cause.downcast_ref::<CatalogError>() {
            return match err {
                CatalogError::UnknownFile(_)
                | CatalogError::UnknownFileName(_)
                | CatalogError::UnknownStorage(_)
                | CatalogError::UnknownKey(_) => exit_code::NOT_FOUND,
                CatalogError::FileAlreadyExists(_) | CatalogError::KeyAlreadyExists => exit_code::ALREADY_EXISTS,
                CatalogError::Sql(_) | CatalogError::ActorGone => exit_code::GENERAL_ERROR,
            };
        }
        if let Some(err) = cause.downcast_ref::<UploadError>() {
            return match err {
                UploadError::FileAlreadyExists(_) => exit_code::ALREADY_EXISTS,
                UploadError::UploadFailed(_) => exit_code::UPLOAD_FAILED,
                UploadError::Balancer(inner) => return categorize_balancer(inner),
                UploadError::Catalog(_) | UploadError::Cipher(_) | UploadError::Io(_) => exit_code::GENERAL_ERROR,
            };
        }
        if let Some(err) = cause.downcast_ref::<DownloadError>() {
            return match err {
                DownloadError::UnknownFile(_) | DownloadError::UnknownStorage(_) | DownloadError::UnknownKey(_) => {
                    exit_code::NOT_FOUND
                }
                DownloadError::BlockDownloadFailed { .. } => exit_code::DOWNLOAD_FAILED,
                DownloadError::CatalogCorrupt { .. } => exit_code::CATALOG_CORRUPT,
                DownloadError::ChecksumMismatch { .. } => exit_code::CHECKSUM_MISMATCH,
                DownloadError::Catalog(_) | DownloadError::Cipher(_) | DownloadError::Io(_) => exit_code::GENERAL_ERROR,
            };
        }
        if cause.downcast_ref::<CipherError>().is_some() {
            return exit_code::GENERAL_ERROR;
        }
    }

    exit_code::GENERAL_ERROR
}

fn categorize_balancer(err: &BalancerError) -> u8 {
    match err {
        BalancerError::NoStorage { .. } => exit_code::NO_STORAGE,
        BalancerError::NoCipher => exit_code::NO_CIPHER,
    }
}
