//! zfs3backup - parallel multipart S3 backup and restore for copy-on-write
//! volume snapshots.
//!
//! This library provides the core functionality shared by the `pput`,
//! `zfs3backup-get`, `zfs3backup`, and `s3-mp-cleanup` binaries.

pub mod config;
pub mod error;
pub mod pair;
pub mod pipe;
pub mod snapshot;
pub mod store;
pub mod uploader;
pub mod volume;
