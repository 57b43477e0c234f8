//! `pput` — parallel multipart upload of stdin to an S3 key (SPEC_FULL.md §6, §A.5).
//!
//! Grounded on `original_source/zfs3backup/pput.py::main`/`parse_args` for
//! the CLI surface, and on the teacher's `src/main.rs` for CLI/logging/runtime wiring.

use clap::Parser;
use std::collections::HashMap;
use std::io::Write;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zfs3backup::config::Config;
use zfs3backup::store::ObjectStore;
use zfs3backup::uploader::{self, UploadOptions, Verbosity};

fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("ZFS3BACKUP_BUILD_TIME"),
        )
    })
}

/// Read data from stdin and upload it to S3 as a multipart object.
#[derive(Parser, Debug)]
#[command(name = "pput")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Destination S3 key.
    name: String,

    /// Read data from this file descriptor instead of stdin; useful if you
    /// want an interactive debugger session to keep stdin free, e.g.
    /// `pput --file-descriptor 3 key 3<./file`.
    #[arg(long = "file-descriptor")]
    file_descriptor: Option<std::os::fd::RawFd>,

    /// Upload chunk size, accepts K|M|G|T suffixes.
    #[arg(short = 's', long = "chunk-size", conflicts_with = "estimated")]
    chunk_size: Option<String>,

    /// Estimated total upload size; chunk size is computed from it.
    #[arg(long, conflicts_with = "chunk_size")]
    estimated: Option<String>,

    /// Number of parallel upload workers.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Object user-metadata as key=value. May be repeated.
    #[arg(long = "metadata", action = clap::ArgAction::Append)]
    metadata: Vec<String>,

    /// S3 storage class.
    #[arg(long = "storage-class")]
    storage_class: Option<String>,

    /// Print per-chunk progress to stderr.
    #[arg(long, conflicts_with = "quiet")]
    progress: bool,

    /// Suppress all non-error output.
    #[arg(long, conflicts_with = "progress")]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("ZFS3BACKUP_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| EnvFilter::new("zfs3backup=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let bucket = config.require_bucket()?.to_string();

    let chunk_size = match cli.estimated {
        Some(ref estimated) => uploader::optimize_chunksize(uploader::parse_size(estimated)?),
        None => match cli.chunk_size {
            Some(ref s) => uploader::parse_size(s)?,
            None => config.chunk_size,
        },
    };

    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else if cli.progress {
        Verbosity::Progress
    } else {
        Verbosity::Normal
    };

    let mut metadata: HashMap<String, String> = HashMap::new();
    for arg in &cli.metadata {
        let (k, v) = uploader::parse_metadata_arg(arg)?;
        metadata.insert(k, v);
    }

    let concurrency = cli.concurrency.unwrap_or(config.concurrency);
    let storage_class = cli
        .storage_class
        .unwrap_or_else(|| config.s3_storage_class.clone());

    if verbosity != Verbosity::Quiet {
        eprintln!(
            "starting upload to {}/{} with chunksize {:.1}M using {} workers",
            bucket,
            cli.name,
            chunk_size as f64 / (1024.0 * 1024.0),
            concurrency
        );
    }

    let store = ObjectStore::new(&config, bucket.clone()).await;
    info!(key = %cli.name, bucket, "beginning multipart upload");

    let opts = UploadOptions {
        key: cli.name.clone(),
        chunk_size,
        concurrency,
        max_retries: config.max_retries,
        storage_class: Some(storage_class),
        metadata,
        verbosity,
    };

    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match cli.file_descriptor {
        Some(fd) => {
            use std::os::fd::FromRawFd;
            // Safety: the fd is caller-supplied (e.g. `pput --file-descriptor 3 key 3<./file`)
            // and expected to be open and owned by this process, matching pput.py's `fopen`.
            let file = unsafe { std::fs::File::from_raw_fd(fd) };
            Box::new(tokio::fs::File::from_std(file))
        }
        None => Box::new(tokio::io::stdin()),
    };
    match uploader::run(&store, reader, opts).await {
        Ok(etag) => {
            if verbosity != Verbosity::Quiet {
                let status = serde_json::json!({"status": "success", "etag": etag});
                println!("{status}");
                std::io::stdout().flush().ok();
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
