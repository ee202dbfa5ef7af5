// src/bin/cli.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! CLI for an S3-backed file storage: metadata sync plus a few inspection
//! commands.
//!
//! Settings come from the environment (and `.env`), exactly as the library
//! resolves them; `--set NAME=VALUE` overrides individual settings.
//!
//! Examples:
//! ```bash
//! s3storage-cli sync-meta                         # re-apply header policy to every object
//! s3storage-cli --static sync-meta                # same, for the _STATIC settings
//! s3storage-cli --set AWS_S3_MAX_AGE_SECONDS=60 sync-meta
//! s3storage-cli ls        css/
//! s3storage-cli stat      css/site.css
//! s3storage-cli url       css/site.css
//! s3storage-cli get       css/site.css ./site.css
//! s3storage-cli put       ./site.css css/site.css
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use futures_util::stream::StreamExt;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use s3storage::storage::logical_size;
use s3storage::{Content, EnvSettings, Overrides, S3Storage, StorageConfig};

/// Macro to safely print with broken pipe handling
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                // Gracefully exit on broken pipe (e.g., when piped to head/tail)
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

// -- Commands

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Use the static-files settings (`*_STATIC` names, public, overwrite on).
    #[arg(long = "static", global = true)]
    static_files: bool,

    /// Override one setting, e.g. `--set AWS_S3_BUCKET_AUTH=false`. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE", global = true)]
    set: Vec<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-apply the current header policy to every stored object without
    /// re-uploading it. Prints each synced name.
    SyncMeta,

    /// List the directories and files directly under a path.
    Ls {
        #[arg(default_value = "")]
        path: String,
    },

    /// Show the stored headers of one file.
    Stat {
        name: String,
    },

    /// Print the URL of a file.
    Url {
        name: String,
    },

    /// Download a file (decompressed) to a local path.
    Get {
        name: String,
        dest: PathBuf,
    },

    /// Upload a local file. Prints the name it was stored under.
    Put {
        src: PathBuf,
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let storage = connect(&cli).await?;

    match cli.cmd {
        Command::SyncMeta => {
            let t0 = Instant::now();
            let mut synced = 0usize;
            let mut names = storage.sync_meta_all();
            while let Some(name) = names.next().await {
                safe_println!("{}", name?);
                synced += 1;
            }
            info!("synced {} objects in {:.2?}", synced, t0.elapsed());
        }

        Command::Ls { path } => {
            let (dirs, files) = storage.listdir(&path).await?;
            for dir in dirs {
                safe_println!("{}/", dir);
            }
            for file in files {
                safe_println!("{}", file);
            }
        }

        Command::Stat { name } => {
            let head = storage.meta(&name).await?;
            safe_println!("Name          : {}", name);
            safe_println!("Key           : {}", storage.key_for(&name));
            safe_println!("Size          : {}", logical_size(&head));
            safe_println!("Stored size   : {}", head.content_length);
            safe_println!("Content-Type  : {}", head.content_type.as_deref().unwrap_or("-"));
            safe_println!("Encoding      : {}", head.content_encoding.as_deref().unwrap_or("-"));
            safe_println!("Cache-Control : {}", head.cache_control.as_deref().unwrap_or("-"));
            let storage_class = head.storage_class.as_deref().unwrap_or("STANDARD");
            safe_println!("Storage class : {}", storage_class);
            let encryption = head.server_side_encryption.as_deref().unwrap_or("-");
            safe_println!("Encryption    : {}", encryption);
            safe_println!("ETag          : {}", head.e_tag.as_deref().unwrap_or("-"));
            if let Some(modified) = head.last_modified {
                safe_println!("Last modified : {}", modified.to_rfc3339());
            }
            for (key, value) in &head.metadata {
                safe_println!("x-amz-meta-{} : {}", key, value);
            }
        }

        Command::Url { name } => {
            safe_println!("{}", storage.url(&name).await?);
        }

        Command::Get { name, dest } => {
            let mut file = storage.open(&name).await?;
            let body = file.read_all()?;
            tokio::fs::write(&dest, &body)
                .await
                .with_context(|| format!("writing {}", dest.display()))?;
            info!("downloaded {} ({} bytes) to {}", name, body.len(), dest.display());
        }

        Command::Put { src, name } => {
            let file = std::fs::File::open(&src)
                .with_context(|| format!("opening {}", src.display()))?;
            let saved = storage.save(&name, Content::from(file)).await?;
            safe_println!("{}", saved);
        }
    }

    Ok(())
}

async fn connect(cli: &Cli) -> Result<S3Storage> {
    let overrides = Overrides::from_pairs(&cli.set)?;
    let source = EnvSettings::load();
    let config = if cli.static_files {
        StorageConfig::static_storage(&source, &overrides)?
    } else {
        StorageConfig::default_storage(&source, &overrides)?
    };
    if config.bucket_name.is_empty() {
        anyhow::bail!(
            "no bucket configured; set AWS_S3_BUCKET_NAME{}",
            if cli.static_files { "_STATIC" } else { "" }
        );
    }
    S3Storage::connect(config).await.context("connecting to S3")
}
