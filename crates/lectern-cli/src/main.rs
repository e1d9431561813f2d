//! lectern CLI
//!
//! Drives the storage service against the JSON file stores.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{error, info};

use lectern_core::config::{LecternConfig, load_config, load_config_from_path};
use lectern_core::impls::{FileCoverStore, FileMetadataStore, InlineTarget};
use lectern_core::ports::{CallbackTarget, Clock, SystemClock};
use lectern_core::{BookRecord, BuildError, ServiceBuilder, ServiceError, StorageService};

#[derive(Debug, Parser)]
#[command(name = "lectern", version, about = "Library metadata and cover storage")]
struct Cli {
    /// Config file (default: ~/.config/lectern/lectern.toml and ./lectern.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory, bypassing the preferred/fallback lookup
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Save a book record and mark it opened now
    SaveBook {
        #[arg(long)]
        path: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "author")]
        authors: Vec<String>,
    },
    /// List recently opened books
    Recent {
        #[arg(long, default_value_t = 10)]
        max: usize,
    },
    /// Store a cover image for a book
    PutCover {
        #[arg(long)]
        book: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Write a book's cover image to a file
    GetCover {
        #[arg(long)]
        book: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Save many records as one batch and print the flush counters
    Burst {
        #[arg(long, default_value_t = 20)]
        writes: usize,
    },
    /// Print service counters as JSON
    Stats,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no cover stored for {0}")]
    NoCover(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match read_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(2);
        }
    };
    lectern_core::init_tracing(&config.logging);

    match run(cli, &config).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("lectern: {e}");
            process::exit(1);
        }
    }
}

fn read_config(cli: &Cli) -> Result<LecternConfig, CliError> {
    let loaded = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    loaded.map_err(|e| CliError::Config(e.to_string()))
}

async fn run(cli: Cli, config: &LecternConfig) -> Result<String, CliError> {
    let mut builder =
        ServiceBuilder::new(FileMetadataStore::new(), FileCoverStore::new()).config(config);
    if let Some(dir) = cli.dir {
        builder = builder.storage_dir(dir);
    }
    let service = builder.build()?;
    service.start()?;

    let result = execute(&service, cli.command).await;

    // Land whatever the command wrote, even if it failed halfway.
    service.force_flush()?;
    service.shutdown().await?;
    info!(stats = ?service.stats(), "done");
    result
}

async fn execute(service: &StorageService, command: Command) -> Result<String, CliError> {
    match command {
        Command::SaveBook {
            path,
            title,
            authors,
        } => {
            let mut book = BookRecord::new(&path).opened_at(SystemClock.now());
            book.title = title;
            book.authors = authors;
            service.save_book_info(book)?;
            service.sync_now().await?;
            Ok(format!("saved {path}"))
        }
        Command::Recent { max } => {
            let (tx, rx) = oneshot::channel();
            service.load_recent_books(max, inline(), move |r| {
                let _ = tx.send(r);
            })?;
            let books = rx.await.map_err(|_| ServiceError::ResultDropped)??;
            Ok(books
                .iter()
                .map(|b| match &b.title {
                    Some(title) => format!("{}\t{}", b.path, title),
                    None => b.path.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::PutCover { book, file } => {
            let data = std::fs::read(&file)?;
            let size = data.len();
            match service.save_cover(&book, data)? {
                Some(_) => {
                    service.sync_now().await?;
                    Ok(format!("stored {size} bytes for {book}"))
                }
                None => Ok(format!("{} is empty, nothing stored", file.display())),
            }
        }
        Command::GetCover { book, out } => {
            let (tx, rx) = oneshot::channel();
            service.load_cover(&book, inline(), move |r| {
                let _ = tx.send(r);
            })?;
            let data = rx
                .await
                .map_err(|_| ServiceError::ResultDropped)??
                .ok_or_else(|| CliError::NoCover(book.clone()))?;
            std::fs::write(&out, &data)?;
            Ok(format!("wrote {} bytes to {}", data.len(), out.display()))
        }
        Command::Burst { writes } => {
            let books = (0..writes)
                .map(|i| BookRecord::new(format!("burst/{i}.epub")))
                .collect();
            service.save_book_infos(books)?;
            service.sync_now().await?;
            Ok(serde_json::to_string_pretty(&service.stats())?)
        }
        Command::Stats => {
            service.sync_now().await?;
            Ok(serde_json::to_string_pretty(&service.stats())?)
        }
    }
}

fn inline() -> Arc<dyn CallbackTarget> {
    Arc::new(InlineTarget)
}
