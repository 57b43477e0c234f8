//! Shared test infrastructure for integration tests.
//!
//! Provides a fake `CommandRunner` for exercising `VolumeManager` against
//! scripted `zfs` output without a real pool, mirroring how the original
//! Python tests substituted a `FakeZFSManager`.

#![allow(dead_code)]

use std::os::unix::process::ExitStatusExt;
use std::process::Output;
use zfs3backup::volume::CommandRunner;

/// A `CommandRunner` that replays scripted output instead of shelling out.
pub struct FakeRunner {
    pub snap_output: String,
    pub dataset_output: String,
}

impl CommandRunner for FakeRunner {
    fn capture(&self, _program: &str, args: &[&str]) -> std::io::Result<Output> {
        let stdout = if args.contains(&"snap") {
            self.snap_output.clone()
        } else {
            self.dataset_output.clone()
        };
        Ok(Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
        })
    }
}

/// A `CommandRunner` that always reports the tool as missing, exercising the
/// "failure returns an empty list" contract instead of propagating an error.
pub struct UnavailableRunner;

impl CommandRunner for UnavailableRunner {
    fn capture(&self, _program: &str, _args: &[&str]) -> std::io::Result<Output> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "zfs: command not found"))
    }
}
