//! `zfs3backup-get` — reads one S3 object and writes its content to stdout
//! (SPEC_FULL.md §6, §A.5 "SUPPLEMENTED FEATURES").
//!
//! Grounded on `original_source/zfs3backup/get.py`.

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zfs3backup::config::Config;
use zfs3backup::store::ObjectStore;

/// Read a key from S3 and write the content to stdout.
#[derive(Parser, Debug)]
#[command(name = "zfs3backup-get")]
#[command(author, about, long_about = None)]
struct Cli {
    /// Name of the S3 key to download.
    name: String,
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
    let store = ObjectStore::new(&config, bucket).await;

    let output = store
        .client
        .get_object()
        .bucket(&store.bucket)
        .key(&cli.name)
        .send()
        .await;

    let object = match output {
        Ok(object) => object,
        Err(e) => {
            eprintln!("get_object call failed");
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let mut body = object.body.into_async_read();
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut body, &mut stdout).await?;
    stdout.flush().await?;
    Ok(())
}
