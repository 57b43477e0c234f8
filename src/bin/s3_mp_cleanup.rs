//! `s3-mp-cleanup` — aborts hanging multipart uploads older than a
//! threshold (SPEC_FULL.md §A.5 "SUPPLEMENTED FEATURES").
//!
//! Grounded on `original_source/zfs3backup/s3_mp_cleanup.py::cleanup_multipart`.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zfs3backup::config::Config;
use zfs3backup::store::ObjectStore;

/// Cleanup hanging multipart S3 uploads.
#[derive(Parser, Debug)]
#[command(name = "s3-mp-cleanup")]
#[command(author, about, long_about = None)]
struct Cli {
    /// Maximum age in days before an in-progress upload is aborted.
    #[arg(long = "max-age", default_value_t = 1)]
    max_days: i64,

    /// Don't cancel any upload, just report what would be cancelled.
    #[arg(long = "dry")]
    dry_run: bool,
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

    let max_age = chrono::Duration::days(cli.max_days);
    let now = chrono::Utc::now();

    println!("{:1} | {:30} | {:20}", "A", "key", "initiated");

    let uploads = store
        .client
        .list_multipart_uploads()
        .bucket(&store.bucket)
        .send()
        .await?;

    for upload in uploads.uploads() {
        let Some(key) = upload.key() else { continue };
        let Some(upload_id) = upload.upload_id() else {
            continue;
        };
        let initiated = upload.initiated();
        let age_marker = match initiated {
            Some(ts) => {
                let initiated_utc = chrono::DateTime::from_timestamp(ts.secs(), 0)
                    .unwrap_or(now);
                if now - initiated_utc >= max_age {
                    if !cli.dry_run {
                        store
                            .client
                            .abort_multipart_upload()
                            .bucket(&store.bucket)
                            .key(key)
                            .upload_id(upload_id)
                            .send()
                            .await?;
                    }
                    "X"
                } else {
                    " "
                }
            }
            None => " ",
        };
        let initiated_display = initiated
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("{age_marker:1} | {key:30} | {initiated_display:20}");
    }

    Ok(())
}
