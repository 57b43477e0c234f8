//! Pair Manager (SPEC_FULL.md §4.7, C7)
//!
//! Grounded on `original_source/zfs3backup/snap.py` (`PairManager`) for the
//! join/plan algorithms.

use crate::error::SnapshotError;
use crate::pipe::{compressor, parse_estimated_size, PipeExecutor};
use crate::snapshot::{LineageHealth, ObjectCatalog, RemoteSnapshot};
use crate::volume::{CommandRunner, LocalSnapshot, SystemCommandRunner, VolumeManager};

/// Result of uploading one snapshot, for status reporting (§6 "backup" output).
#[derive(Debug, Clone)]
pub struct BackedUpSnapshot {
    pub snap_name: String,
    pub size: u64,
}

/// Joins the local and remote catalogs by name and plans backup/restore (C7).
pub struct PairManager<R: CommandRunner = SystemCommandRunner> {
    catalog: ObjectCatalog,
    volume: VolumeManager<R>,
    pipe: PipeExecutor,
    compressor: Option<String>,
    s3_prefix: String,
}

impl<R: CommandRunner> PairManager<R> {
    pub fn new(
        catalog: ObjectCatalog,
        volume: VolumeManager<R>,
        pipe: PipeExecutor,
        compressor: Option<String>,
        s3_prefix: String,
    ) -> Self {
        Self {
            catalog,
            volume,
            pipe,
            compressor,
            s3_prefix,
        }
    }

    /// All locals first in catalog order, then remotes not seen locally (§4.7).
    pub fn list(&self) -> Vec<(Option<RemoteSnapshot>, Option<LocalSnapshot>)> {
        let mut pairs = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for z_snap in self.volume.list() {
            seen.insert(z_snap.full_name.clone());
            let remote = self.catalog.get(&z_snap.full_name).cloned();
            pairs.push((remote, Some(z_snap.clone())));
        }
        for s3_snap in self.catalog.list() {
            if !seen.contains(&s3_snap.name) {
                pairs.push((Some(s3_snap.clone()), None));
            }
        }
        pairs
    }

    /// Lineage health of a named remote snapshot, for status reporting.
    pub fn health(&self, name: &str) -> LineageHealth {
        self.catalog.health(name)
    }

    fn snapshot_to_backup(&self, snap_name: Option<&str>) -> Result<LocalSnapshot, SnapshotError> {
        match snap_name {
            None => self.volume.get_latest(),
            Some(name) => self
                .volume
                .get(name)
                .ok_or_else(|| SnapshotError::NotFound(name.to_string())),
        }
    }

    fn pput_cmd(&self, estimated: u64, key: &str, meta: &[(&str, String)]) -> String {
        let mut metas = String::new();
        for (k, v) in meta {
            metas.push_str(&format!(" --metadata {k}={v}"));
        }
        if let Some(ref compressor) = self.compressor {
            metas.push_str(&format!(" --metadata compressor={compressor}"));
        }
        format!("pput --quiet --estimated {estimated}{metas} {key}")
    }

    fn compress_pipe(&self, cmd: &str) -> String {
        match self.compressor.as_deref().and_then(compressor) {
            Some(c) => format!("{} | {cmd}", c.compress_cmd),
            None => cmd.to_string(),
        }
    }

    fn decompress_pipe(&self, cmd: &str, s3_snap: &RemoteSnapshot) -> String {
        match s3_snap.compressor().and_then(compressor) {
            Some(c) => format!("{} | {cmd}", c.decompress_cmd),
            None => cmd.to_string(),
        }
    }

    fn estimate(&self, send_probe: &str) -> Result<u64, SnapshotError> {
        let output = self
            .pipe
            .capture(send_probe)
            .map_err(|e| SnapshotError::VolumeManager(e.to_string()))?;
        parse_estimated_size(&output)
            .ok_or_else(|| SnapshotError::VolumeManager(format!("failed to parse estimate from '{output}'")))
    }

    /// Full backup of a snapshot, defaulting to the latest local one (§4.7).
    pub fn backup_full(
        &self,
        snap_name: Option<&str>,
        dry_run: bool,
    ) -> Result<Vec<BackedUpSnapshot>, SnapshotError> {
        let z_snap = self.snapshot_to_backup(snap_name)?;
        let estimated = self.estimate(&format!("zfs send -nvP {}", z_snap.full_name))?;
        let key = format!("{}{}", self.s3_prefix, z_snap.full_name);
        let pput = self.pput_cmd(estimated, &key, &[("isfull", "true".to_string())]);
        let send = format!("zfs send '{}'", z_snap.full_name);
        self.pipe
            .pipe(&send, &self.compress_pipe(&pput), Some(estimated), dry_run)
            .map_err(|e| SnapshotError::VolumeManager(e.to_string()))?;
        Ok(vec![BackedUpSnapshot {
            snap_name: z_snap.full_name,
            size: estimated,
        }])
    }

    /// Incremental backup: uploads the target and any missing ancestors (§4.7, §8.6).
    pub fn backup_incremental(
        &self,
        snap_name: Option<&str>,
        dry_run: bool,
    ) -> Result<Vec<BackedUpSnapshot>, SnapshotError> {
        let z_snap = self.snapshot_to_backup(snap_name)?;
        let mut to_upload = Vec::new();
        let mut current = z_snap;
        loop {
            if let Some(s3_snap) = self.catalog.get(&current.full_name) {
                if !self.catalog.health(&s3_snap.name).is_healthy() {
                    return Err(SnapshotError::Integrity(format!(
                        "Broken snapshot detected {}, reason: '{}'",
                        s3_snap.name,
                        self.catalog.health(&s3_snap.name).reason()
                    )));
                }
                break;
            }
            match current.parent_name.clone() {
                None => {
                    to_upload.push(current);
                    break;
                }
                Some(parent_name) => {
                    to_upload.push(current);
                    current = self
                        .volume
                        .get(&parent_name)
                        .ok_or(SnapshotError::NotFound(parent_name))?;
                }
            }
        }

        let mut uploaded = Vec::new();
        for z_snap in to_upload.into_iter().rev() {
            let parent_name = z_snap.parent_name.clone();
            let estimated = match &parent_name {
                Some(parent) => {
                    self.estimate(&format!("zfs send -nvP -i '{parent}' '{}'", z_snap.full_name))?
                }
                None => self.estimate(&format!("zfs send -nvP {}", z_snap.full_name))?,
            };
            let key = format!("{}{}", self.s3_prefix, z_snap.full_name);
            let meta: Vec<(&str, String)> = match &parent_name {
                Some(parent) => vec![("parent", parent.clone())],
                None => vec![("isfull", "true".to_string())],
            };
            let pput = self.pput_cmd(estimated, &key, &meta);
            let send = match &parent_name {
                Some(parent) => format!("zfs send -i '{parent}' '{}'", z_snap.full_name),
                None => format!("zfs send '{}'", z_snap.full_name),
            };
            self.pipe
                .pipe(&send, &self.compress_pipe(&pput), Some(estimated), dry_run)
                .map_err(|e| SnapshotError::VolumeManager(e.to_string()))?;
            uploaded.push(BackedUpSnapshot {
                snap_name: z_snap.full_name,
                size: estimated,
            });
        }
        Ok(uploaded)
    }

    /// Restores a snapshot chain, root-first (§4.7, §8.7).
    pub fn restore(&self, snap_name: &str, dry_run: bool, force: bool) -> Result<(), SnapshotError> {
        let dataset = snap_name
            .split('@')
            .next()
            .ok_or_else(|| SnapshotError::NotFound(snap_name.to_string()))?;
        if !force && self.volume.dataset_exists(dataset) {
            println!(
                "The dataset: {dataset} already exists locally; if you choose to overwrite it specify '--force'"
            );
            return Ok(());
        }

        let mut current = self
            .catalog
            .get(snap_name)
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound(snap_name.to_string()))?;
        let mut to_restore = Vec::new();
        loop {
            if self.volume.get(&current.name).is_some() {
                println!(
                    "Snapshot already exists locally. If you'd like to rollback to it you can run 'zfs rollback {}'",
                    current.name
                );
                break;
            }
            let health = self.catalog.health(&current.name);
            if !health.is_healthy() {
                return Err(SnapshotError::Integrity(format!(
                    "Broken snapshot detected {}, reason: '{}'",
                    current.name,
                    health.reason()
                )));
            }
            let is_full = current.is_full();
            to_restore.push(current.clone());
            if is_full {
                break;
            }
            let parent_name = current.parent_name().unwrap().to_string();
            current = self
                .catalog
                .get(&parent_name)
                .cloned()
                .ok_or(SnapshotError::NotFound(parent_name))?;
        }

        let force_flag = if force { "-F " } else { "" };
        for s3_snap in to_restore.into_iter().rev() {
            let download = format!("zfs3backup-get {}{}", self.s3_prefix, s3_snap.name);
            let recv = format!("zfs recv {force_flag}{}", s3_snap.name);
            self.pipe
                .pipe(
                    &download,
                    &self.decompress_pipe(&recv, &s3_snap),
                    Some(s3_snap.size_bytes.max(0) as u64),
                    dry_run,
                )
                .map_err(|e| SnapshotError::VolumeManager(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::catalog_from;
    use crate::volume::VolumeManager;
    use std::os::unix::process::ExitStatusExt;

    struct FakeRunner {
        snap_output: &'static str,
    }

    impl CommandRunner for FakeRunner {
        fn capture(&self, _program: &str, args: &[&str]) -> std::io::Result<std::process::Output> {
            let stdout = if args.contains(&"snap") {
                self.snap_output.as_bytes().to_vec()
            } else {
                b"tank\n".to_vec()
            };
            Ok(std::process::Output {
                status: std::process::ExitStatus::from_raw(0),
                stdout,
                stderr: Vec::new(),
            })
        }
    }

    fn snap(name: &str, metadata: &[(&str, &str)]) -> RemoteSnapshot {
        RemoteSnapshot {
            name: name.to_string(),
            size_bytes: 1024,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn pair_with(
        remotes: Vec<RemoteSnapshot>,
        snap_output: &'static str,
    ) -> PairManager<FakeRunner> {
        let catalog = catalog_from(remotes);
        let volume = VolumeManager::with_runner("tank", "zfs-auto-snap:daily", FakeRunner { snap_output });
        PairManager::new(catalog, volume, PipeExecutor::new(true), None, "zfs3backup/".to_string())
    }

    /// Guards mutation of the process-wide `PATH` so the `zfs`-shim tests
    /// below don't race each other across threads.
    static PATH_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Prepends a fake `zfs` binary to `PATH` that answers `send -nvP` probes
    /// with a fixed estimate and anything else with success, so
    /// `backup_full`/`backup_incremental` can run their real pipe/estimate
    /// logic without a real pool. Returns a guard restoring `PATH` on drop.
    struct FakeZfsOnPath {
        _lock: std::sync::MutexGuard<'static, ()>,
        original_path: String,
        _dir: tempfile::TempDir,
    }

    impl Drop for FakeZfsOnPath {
        fn drop(&mut self) {
            unsafe { std::env::set_var("PATH", &self.original_path) };
        }
    }

    fn fake_zfs_on_path() -> FakeZfsOnPath {
        let lock = PATH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("zfs");
        std::fs::write(&script, "#!/bin/sh\ncase \"$*\" in\n  *-nvP*) echo \"size\t1234\" ;;\nesac\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let original_path = std::env::var("PATH").unwrap_or_default();
        let new_path = format!("{}:{}", dir.path().display(), original_path);
        unsafe { std::env::set_var("PATH", &new_path) };
        FakeZfsOnPath {
            _lock: lock,
            original_path,
            _dir: dir,
        }
    }

    #[test]
    fn list_pairs_locals_first_then_unseen_remotes() {
        let pair = pair_with(
            vec![snap("tank@zfs-auto-snap:daily-2", &[])],
            "tank@zfs-auto-snap:daily-1\t1K\t10K\t/tank\t1K\n",
        );
        let pairs = pair.list();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].1.as_ref().unwrap().full_name, "tank@zfs-auto-snap:daily-1");
        assert!(pairs[0].0.is_none());
        assert_eq!(pairs[1].0.as_ref().unwrap().name, "tank@zfs-auto-snap:daily-2");
        assert!(pairs[1].1.is_none());
    }

    #[test]
    fn backup_full_dry_run_uploads_the_latest_local_snapshot() {
        let _fake_zfs = fake_zfs_on_path();
        let pair = pair_with(
            vec![],
            "tank@zfs-auto-snap:daily-1\t1K\t10K\t/tank\t1K\n",
        );
        let uploaded = pair.backup_full(None, true).unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].snap_name, "tank@zfs-auto-snap:daily-1");
        assert_eq!(uploaded[0].size, 1234);
    }

    #[test]
    fn backup_incremental_stops_at_a_remotely_present_healthy_ancestor() {
        let _fake_zfs = fake_zfs_on_path();
        let pair = pair_with(
            vec![snap("tank@zfs-auto-snap:daily-1", &[("isfull", "true")])],
            "tank@zfs-auto-snap:daily-1\t1K\t10K\t/tank\t1K\n\
             tank@zfs-auto-snap:daily-2\t1K\t10K\t/tank\t1K\n",
        );
        let uploaded = pair.backup_incremental(None, true).unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].snap_name, "tank@zfs-auto-snap:daily-2");
    }

    #[test]
    fn backup_incremental_rejects_a_broken_remote_ancestor() {
        let pair = pair_with(
            vec![snap(
                "tank@zfs-auto-snap:daily-1",
                &[("parent", "tank@zfs-auto-snap:daily-0")],
            )],
            "tank@zfs-auto-snap:daily-1\t1K\t10K\t/tank\t1K\n\
             tank@zfs-auto-snap:daily-2\t1K\t10K\t/tank\t1K\n",
        );
        let err = pair.backup_incremental(None, true).unwrap_err();
        assert!(matches!(err, SnapshotError::Integrity(_)));
    }

    #[test]
    fn restore_rejects_a_broken_remote_chain() {
        let pair = pair_with(
            vec![snap(
                "tank@zfs-auto-snap:daily-2",
                &[("parent", "tank@zfs-auto-snap:daily-missing")],
            )],
            "",
        );
        let err = pair
            .restore("tank@zfs-auto-snap:daily-2", true, true)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Integrity(_)));
    }
}
