//! Integration tests for the local snapshot catalog (SPEC_FULL.md §4.5, C5).

mod common;

use common::{FakeRunner, UnavailableRunner};
use zfs3backup::volume::VolumeManager;

#[test]
fn lists_only_the_requested_dataset_and_prefix() {
    let runner = FakeRunner {
        snap_output: "tank@zfs-auto-snap:daily-1\t1K\t10K\t/tank\t1K\n\
             tank/child@zfs-auto-snap:daily-1\t1K\t10K\t/tank/child\t1K\n\
             tank@zfs-auto-snap:daily-2\t2K\t10K\t/tank\t2K\n"
            .to_string(),
        dataset_output: "tank\ntank/child\n".to_string(),
    };
    let mgr = VolumeManager::with_runner("tank", "zfs-auto-snap:daily", runner);
    let snaps = mgr.list();
    assert_eq!(snaps.len(), 2);
    assert!(snaps.iter().all(|s| s.full_name.starts_with("tank@")));
}

#[test]
fn get_looks_up_by_full_name() {
    let runner = FakeRunner {
        snap_output: "tank@zfs-auto-snap:daily-1\t1K\t10K\t/tank\t1K\n".to_string(),
        dataset_output: "tank\n".to_string(),
    };
    let mgr = VolumeManager::with_runner("tank", "zfs-auto-snap:daily", runner);
    assert!(mgr.get("tank@zfs-auto-snap:daily-1").is_some());
    assert!(mgr.get("tank@does-not-exist").is_none());
}

#[test]
fn missing_zfs_binary_yields_empty_catalog_not_an_error() {
    let mgr = VolumeManager::with_runner("tank", "zfs-auto-snap:daily", UnavailableRunner);
    assert!(mgr.list().is_empty());
    assert!(!mgr.dataset_exists("tank"));
    assert!(mgr.get_latest().is_err());
}
