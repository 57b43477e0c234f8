//! Error taxonomy (see SPEC_FULL.md §7)

use thiserror::Error;

/// Errors from the chunked multipart uploader (C1-C3).
#[derive(Debug, Error)]
pub enum UploaderError {
    #[error("I/O error reading input stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload part {index} failed after exhausting retries: {source}")]
    UploadFatal {
        index: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("upload worker crashed")]
    WorkerCrashed,

    #[error("can't upload zero bytes")]
    ZeroByteInput,

    #[error("S3 request failed: {0}")]
    S3(String),
}

/// Errors from the snapshot-chain subsystem (C4, C6, C7).
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{0}")]
    Integrity(String),

    /// Expected condition that should not abort a larger loop; exit code 0.
    #[error("{0}")]
    Soft(String),

    #[error("volume manager command failed: {0}")]
    VolumeManager(String),

    #[error("S3 request failed: {0}")]
    S3(String),

    #[error("no such snapshot: {0}")]
    NotFound(String),
}

/// Errors from the pipe executor (C8).
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("command `{command}` exited with status {status}")]
    SubprocessFailed { command: String, status: i32 },

    #[error("I/O error spawning `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors; user-visible, process exits non-zero before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration option '{0}' is not set")]
    Missing(&'static str),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level error composing all subsystem errors, used at the binary boundary.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Uploader(#[from] UploaderError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Pipe(#[from] PipeError),
}

impl BackupError {
    /// True for conditions that should print to stderr and exit 0 rather
    /// than abort with a failure status (§7 `SoftError`).
    pub fn is_soft(&self) -> bool {
        matches!(self, BackupError::Snapshot(SnapshotError::Soft(_)))
    }
}

impl From<aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error>>
    for SnapshotError
{
    fn from(
        err: aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error,
        >,
    ) -> Self {
        SnapshotError::S3(err.to_string())
    }
}

impl From<aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>>
    for SnapshotError
{
    fn from(
        err: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>,
    ) -> Self {
        SnapshotError::S3(err.to_string())
    }
}
