//! Pipe Executor and compressor table (SPEC_FULL.md §4.8, §6, C8)
//!
//! Grounded on `original_source/zfs3backup/snap.py` (`CommandExecutor`,
//! `COMPRESSORS`).

use crate::error::PipeError;
use std::process::Command;

/// A compressor's shell command pair, keyed by label (§6 "Compressors").
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    pub compress_cmd: &'static str,
    pub decompress_cmd: &'static str,
}

/// Looks up a compressor by label. Returns `None` for `"none"` or an unknown label.
pub fn compressor(label: &str) -> Option<Compressor> {
    match label {
        "pigz1" => Some(Compressor {
            compress_cmd: "pigz -1 --blocksize 4096",
            decompress_cmd: "pigz -d",
        }),
        "pigz4" => Some(Compressor {
            compress_cmd: "pigz -4 --blocksize 4096",
            decompress_cmd: "pigz -d",
        }),
        _ => None,
    }
}

/// Runs shell pipelines, optionally inserting a throughput meter (C8).
pub struct PipeExecutor {
    quiet: bool,
}

impl PipeExecutor {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// `true` if `pv` is on `PATH`.
    pub fn has_pv(&self) -> bool {
        Command::new("which")
            .arg("pv")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Runs `cmd` through `sh -c`, inheriting stdio. Prints instead of
    /// running when `dry_run` is set.
    pub fn shell(&self, cmd: &str, dry_run: bool) -> Result<(), PipeError> {
        if dry_run {
            println!("{cmd}");
            return Ok(());
        }
        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .map_err(|source| PipeError::Spawn {
                command: cmd.to_string(),
                source,
            })?;
        if !status.success() {
            return Err(PipeError::SubprocessFailed {
                command: cmd.to_string(),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    /// Runs `cmd` and captures combined stdout/stderr; always executes,
    /// regardless of `dry_run`, since it's a read-only probe like `zfs send
    /// -nvP` (§4.7).
    pub fn capture(&self, cmd: &str) -> Result<String, PipeError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|source| PipeError::Spawn {
                command: cmd.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(PipeError::SubprocessFailed {
                command: cmd.to_string(),
                status: output.status.code().unwrap_or(-1),
            });
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }

    /// Builds and runs `cmd1 | [pv] | cmd2`, inserting a throughput meter
    /// when available and not suppressed by `quiet`.
    pub fn pipe(
        &self,
        cmd1: &str,
        cmd2: &str,
        estimated_size: Option<u64>,
        dry_run: bool,
    ) -> Result<(), PipeError> {
        let full = if self.has_pv() && !self.quiet {
            let pv = match estimated_size {
                Some(size) => format!("pv --size {size}"),
                None => "pv".to_string(),
            };
            format!("{cmd1} | {pv} | {cmd2}")
        } else {
            format!("{cmd1} | {cmd2}")
        };
        self.shell(&full, dry_run)
    }
}

/// Parses the last non-empty line's last whitespace-separated token as a
/// byte count, matching `zfs send -nvP`'s estimate output (§4.7, §6).
pub fn parse_estimated_size(output: &str) -> Option<u64> {
    let last_line = output.lines().rfind(|l| !l.trim().is_empty())?;
    last_line.split_whitespace().next_back()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressor_lookup() {
        let c = compressor("pigz1").unwrap();
        assert_eq!(c.compress_cmd, "pigz -1 --blocksize 4096");
        assert_eq!(c.decompress_cmd, "pigz -d");
        assert!(compressor("none").is_none());
        assert!(compressor("bogus").is_none());
    }

    #[test]
    fn test_parse_estimated_size() {
        let output = "full\tD@a\t0\nsize\t123456\n";
        assert_eq!(parse_estimated_size(output), Some(123456));
    }

    #[test]
    fn test_parse_estimated_size_trailing_blank_lines() {
        let output = "incremental\tD@a\tD@b\nsize\t9000\n\n\n";
        assert_eq!(parse_estimated_size(output), Some(9000));
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let exec = PipeExecutor::new(true);
        assert!(exec.shell("exit 1", true).is_ok());
    }
}
