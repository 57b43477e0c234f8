//! `zfs3backup` — status/backup/restore orchestrator (SPEC_FULL.md §6, C7).
//!
//! Grounded on `original_source/zfs3backup/snap.py` (`parse_args`, `main`,
//! `list_snapshots`, `do_backup`, `restore`, `_humanize`, `_prepare_line`).

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zfs3backup::config::Config;
use zfs3backup::pair::PairManager;
use zfs3backup::pipe::PipeExecutor;
use zfs3backup::snapshot::ObjectCatalog;
use zfs3backup::store::ObjectStore;
use zfs3backup::volume::VolumeManager;

/// Manage ZFS snapshot backups to S3-compatible object storage.
#[derive(Parser, Debug)]
#[command(name = "zfs3backup")]
#[command(author, about, long_about = None)]
struct Cli {
    /// S3 key prefix. Defaults to the configured value or "zfs3backup/".
    #[arg(long = "s3-prefix")]
    s3_prefix: Option<String>,

    /// The ZFS dataset/filesystem to operate on.
    #[arg(long = "filesystem", visible_alias = "dataset")]
    filesystem: Option<String>,

    /// Only operate on snapshots that start with this prefix.
    #[arg(long = "snapshot-prefix")]
    snapshot_prefix: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show status of current backups.
    Status,
    /// Backup local zfs snapshots to an S3 bucket.
    Backup {
        /// Snapshot to backup. Defaults to latest.
        #[arg(long)]
        snapshot: Option<String>,
        #[arg(long = "dry-run")]
        dry: bool,
        /// Compressor label, or "none" to disable. Defaults to the configured value.
        #[arg(long)]
        compressor: Option<String>,
        /// Machine readable output.
        #[arg(long)]
        parseable: bool,
        #[arg(long, conflicts_with = "incremental")]
        full: bool,
        #[arg(long, default_value_t = true)]
        incremental: bool,
    },
    /// Restore from a snapshot.
    Restore {
        /// Snapshot to restore.
        snapshot: String,
        #[arg(long = "dry-run")]
        dry: bool,
        /// Force rollback of the filesystem (zfs recv -F).
        #[arg(long)]
        force: bool,
    },
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
    match runtime.block_on(async_main(cli)) {
        Ok(()) => Ok(()),
        Err(e) if e.is_soft() => {
            eprintln!("{e}");
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn async_main(cli: Cli) -> Result<(), zfs3backup::error::BackupError> {
    let config = Config::load();
    let bucket = config.require_bucket()?.to_string();
    let filesystem = cli
        .filesystem
        .or_else(|| config.filesystem.clone())
        .ok_or(zfs3backup::error::ConfigError::Missing("FILESYSTEM"))?;

    let fs_section = config.filesystem_section(&filesystem);
    let snapshot_prefix = cli
        .snapshot_prefix
        .unwrap_or_else(|| fs_section.snapshot_prefix.clone());
    let s3_prefix = cli.s3_prefix.unwrap_or_else(|| config.normalized_s3_prefix());

    let store = ObjectStore::new(&config, bucket).await;
    let catalog_prefix = format!("{filesystem}@{snapshot_prefix}");
    let catalog = ObjectCatalog::load(store, &s3_prefix, &catalog_prefix).await?;
    let volume = VolumeManager::new(filesystem.clone(), snapshot_prefix.clone());

    match cli.command {
        Command::Status => {
            println!(
                "Checking backup status for: {filesystem}@{snapshot_prefix}* on bucket: {}/{}\n",
                catalog.bucket(),
                catalog.prefix()
            );
            let pipe = PipeExecutor::new(true);
            let pair = PairManager::new(catalog, volume, pipe, None, s3_prefix);
            print_status(&pair);
        }
        Command::Backup {
            snapshot,
            dry,
            compressor,
            parseable,
            full,
            incremental: _,
        } => {
            let compressor = match compressor.or_else(|| fs_section.compressor.clone()) {
                Some(c) if c.eq_ignore_ascii_case("none") => None,
                other => other,
            };
            let pipe = PipeExecutor::new(dry);
            let pair = PairManager::new(catalog, volume, pipe, compressor, s3_prefix);
            let snap_name = snapshot.map(|s| format!("{filesystem}@{s}"));
            let uploaded = if full {
                pair.backup_full(snap_name.as_deref(), dry)?
            } else {
                pair.backup_incremental(snap_name.as_deref(), dry)?
            };
            for meta in uploaded {
                if parseable {
                    println!("{}\0{}", meta.snap_name, meta.size);
                } else {
                    println!(
                        "Successfuly backed up {}: {}",
                        meta.snap_name,
                        humanize(meta.size)
                    );
                }
            }
        }
        Command::Restore {
            snapshot,
            dry,
            force,
        } => {
            let pipe = PipeExecutor::new(dry);
            let pair = PairManager::new(catalog, volume, pipe, None, s3_prefix.clone());
            let snap_name = format!("{filesystem}@{snapshot_prefix}{snapshot}");
            pair.restore(&snap_name, dry, force)?;
        }
    }

    Ok(())
}

fn print_status(pair: &PairManager) {
    let header = ("NAME", "PARENT", "TYPE", "HEALTH", "LOCAL STATE", "SIZE");
    let mut rows = Vec::new();
    for (remote, local) in pair.list() {
        rows.push(prepare_line(remote.as_ref(), local.as_ref(), pair));
    }
    let mut widths = [
        header.0.len(),
        header.1.len(),
        header.2.len(),
        header.3.len(),
        header.4.len(),
        header.5.len(),
    ];
    for row in &rows {
        widths[0] = widths[0].max(row.0.len());
        widths[1] = widths[1].max(row.1.len());
        widths[2] = widths[2].max(row.2.len());
        widths[3] = widths[3].max(row.3.len());
        widths[4] = widths[4].max(row.4.len());
        widths[5] = widths[5].max(row.5.len());
    }
    println!(
        "{:w0$} | {:w1$} | {:w2$} | {:w3$} | {:w4$} | {:w5$}",
        header.0,
        header.1,
        header.2,
        header.3,
        header.4,
        header.5,
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
        w3 = widths[3],
        w4 = widths[4],
        w5 = widths[5],
    );
    rows.sort();
    for row in rows {
        println!(
            "{:w0$} | {:w1$} | {:w2$} | {:w3$} | {:w4$} | {:w5$}",
            row.0,
            row.1,
            row.2,
            row.3,
            row.4,
            row.5,
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
            w4 = widths[4],
            w5 = widths[5],
        );
    }
}

type StatusRow = (String, String, String, String, String, String);

fn prepare_line(
    s3_snap: Option<&zfs3backup::snapshot::RemoteSnapshot>,
    z_snap: Option<&zfs3backup::volume::LocalSnapshot>,
    pair: &PairManager,
) -> StatusRow {
    match s3_snap {
        None => {
            let name = z_snap
                .map(|s| s.full_name.split_once('@').map(|(_, tag)| tag).unwrap_or(&s.full_name).to_string())
                .unwrap_or_default();
            (name, "-".to_string(), "missing".to_string(), "-".to_string(), "ok".to_string(), String::new())
        }
        Some(s3) => {
            let snap_type = if s3.is_full() { "full" } else { "incremental" };
            let health = pair.health(&s3.name).reason().to_string();
            let parent_name = if s3.is_full() {
                String::new()
            } else {
                s3.parent_name()
                    .and_then(|p| p.split_once('@'))
                    .map(|(_, tag)| tag.to_string())
                    .unwrap_or_default()
            };
            let name = s3.name.split_once('@').map(|(_, tag)| tag.to_string()).unwrap_or_else(|| s3.name.clone());
            let local_state = if z_snap.is_some() { "ok" } else { "missing" };
            let size = s3
                .uncompressed_size()
                .and_then(|s| s.parse::<u64>().ok())
                .map(humanize)
                .unwrap_or_default();
            (name, parent_name, snap_type.to_string(), health, local_state.to_string(), size)
        }
    }
}

fn humanize(size: u64) -> String {
    let units = ["M", "G", "T"];
    let mut value = size as f64 / (1024.0 * 1024.0);
    let mut unit_index = 0;
    while value > 1024.0 && unit_index < units.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", units[unit_index])
}
