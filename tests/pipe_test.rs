//! Integration tests for the pipe executor (SPEC_FULL.md §4.8, C8).
//!
//! These spawn a real shell; no ZFS or S3 dependency.

use zfs3backup::pipe::PipeExecutor;

#[test]
fn shell_runs_real_commands_and_surfaces_failures() {
    let exec = PipeExecutor::new(true);
    assert!(exec.shell("true", false).is_ok());
    assert!(exec.shell("exit 7", false).is_err());
}

#[test]
fn capture_ignores_dry_run_and_returns_combined_output() {
    let exec = PipeExecutor::new(true);
    let out = exec.capture("echo out; echo err 1>&2").unwrap();
    assert!(out.contains("out"));
    assert!(out.contains("err"));
}

#[test]
fn pipe_joins_two_commands_with_a_shell_pipeline() {
    let exec = PipeExecutor::new(true);
    // quiet=true means no `pv` meter is spliced in, regardless of whether
    // `pv` happens to be installed on the test host.
    assert!(exec.pipe("echo hello", "cat", Some(5), false).is_ok());
}

#[test]
fn pipe_dry_run_never_touches_the_shell() {
    let exec = PipeExecutor::new(false);
    // A command that would fail if actually executed; dry_run must skip it.
    assert!(exec.pipe("exit 1", "exit 1", None, true).is_ok());
}
