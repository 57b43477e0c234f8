//! Local Snapshot Catalog (SPEC_FULL.md §4.5, C5)
//!
//! Grounded on `original_source/zfs3backup/snap.py` (`ZFSSnapshot`,
//! `ZFSSnapshotManager._parse_snapshots`/`_build_snapshots`/`datasets`) for
//! the parsing and parent-chaining algorithm.

use crate::error::SnapshotError;
use std::cell::OnceCell;
use std::process::Output;

/// A snapshot reported by the volume manager's listing tool, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub full_name: String,
    pub used: String,
    pub refer: String,
    pub mountpoint: String,
    pub written: String,
    pub parent_name: Option<String>,
}

/// Abstracts subprocess invocation so the catalog can be exercised without a
/// real volume manager installed.
pub trait CommandRunner: Send + Sync {
    fn capture(&self, program: &str, args: &[&str]) -> std::io::Result<Output>;
}

/// Shells out to the real `zfs` binary.
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn capture(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        std::process::Command::new(program).args(args).output()
    }
}

/// Queries the volume manager for a dataset's snapshots, preserving their
/// natural (creation) order (C5). Loaded once and cached, matching the
/// original's memoized `_snapshots`/`datasets` (§4.5, §5 "immutable after
/// initial load").
pub struct VolumeManager<R: CommandRunner = SystemCommandRunner> {
    fs_name: String,
    snapshot_prefix: String,
    runner: R,
    snapshots: OnceCell<Vec<LocalSnapshot>>,
    datasets: OnceCell<Vec<String>>,
}

impl VolumeManager<SystemCommandRunner> {
    pub fn new(fs_name: impl Into<String>, snapshot_prefix: impl Into<String>) -> Self {
        Self::with_runner(fs_name, snapshot_prefix, SystemCommandRunner)
    }
}

impl<R: CommandRunner> VolumeManager<R> {
    pub fn with_runner(fs_name: impl Into<String>, snapshot_prefix: impl Into<String>, runner: R) -> Self {
        Self {
            fs_name: fs_name.into(),
            snapshot_prefix: snapshot_prefix.into(),
            runner,
            snapshots: OnceCell::new(),
            datasets: OnceCell::new(),
        }
    }

    /// Lists snapshots of this dataset matching `snapshot_prefix`, oldest first.
    /// Returns an empty list (rather than an error) if the tool can't be invoked
    /// at all (§4.5 "Failure"). Invokes the volume manager at most once.
    pub fn list(&self) -> &[LocalSnapshot] {
        self.snapshots.get_or_init(|| {
            let output = match self.runner.capture(
                "zfs",
                &["list", "-Ht", "snap", "-o", "name,used,refer,mountpoint,written"],
            ) {
                Ok(output) if output.status.success() => output.stdout,
                _ => return Vec::new(),
            };
            self.parse_snapshots(&output)
        })
    }

    fn parse_snapshots(&self, raw: &[u8]) -> Vec<LocalSnapshot> {
        let text = String::from_utf8_lossy(raw);
        let mut result = Vec::new();
        let mut parent: Option<String> = None;
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let [name, used, refer, mountpoint, written] = fields.as_slice() else {
                continue;
            };
            let Some((vol_name, snap_name)) = name.split_once('@') else {
                continue;
            };
            if vol_name != self.fs_name {
                continue;
            }
            if !snap_name.starts_with(&self.snapshot_prefix) {
                continue;
            }
            let snapshot = LocalSnapshot {
                full_name: name.to_string(),
                used: used.to_string(),
                refer: refer.to_string(),
                mountpoint: mountpoint.to_string(),
                written: written.to_string(),
                parent_name: parent.clone(),
            };
            parent = Some(snapshot.full_name.clone());
            result.push(snapshot);
        }
        result
    }

    pub fn get(&self, name: &str) -> Option<LocalSnapshot> {
        self.list().iter().find(|s| s.full_name == name).cloned()
    }

    /// The most recently created matching snapshot, or a soft "nothing to
    /// back up" error if none exist (§4.5, §7 `SoftError`).
    pub fn get_latest(&self) -> Result<LocalSnapshot, SnapshotError> {
        self.list().last().cloned().ok_or_else(|| {
            SnapshotError::Soft(format!(
                "Nothing to backup for filesystem '{}'. Are you sure snapshot_prefix='{}' is correct?",
                self.fs_name, self.snapshot_prefix
            ))
        })
    }

    /// All dataset names known to the volume manager. Invokes the volume
    /// manager at most once.
    pub fn datasets(&self) -> &[String] {
        self.datasets.get_or_init(|| {
            let output = match self.runner.capture("zfs", &["list", "-H", "-o", "name"]) {
                Ok(output) if output.status.success() => output.stdout,
                _ => return Vec::new(),
            };
            String::from_utf8_lossy(&output)
                .lines()
                .map(str::to_string)
                .collect()
        })
    }

    pub fn dataset_exists(&self, dataset: &str) -> bool {
        self.datasets().iter().any(|d| d == dataset)
    }
}
