//! Chunk Reader, Upload Worker, Upload Coordinator (SPEC_FULL.md §4.1-4.3, C1-C3)
//!
//! Grounded on `original_source/zfs3backup/pput.py` (`StreamHandler`,
//! `UploadWorker`, `UploadSupervisor`) for algorithmic behavior, and on
//! `src/multipart.rs`'s MD5/hex handling for idiomatic shape.

use crate::error::UploaderError;
use crate::store::ObjectStore;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Output verbosity, driven by `--progress`/`--quiet` (§6 CLI surface, §A.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Normal = 1,
    Progress = 2,
}

/// Parse a human size string with an optional `K|M|G|T` suffix (§6 "Chunk size selection").
pub fn parse_size(size: &str) -> Result<u64, std::num::ParseIntError> {
    let size = size.trim().to_uppercase();
    let Some(last) = size.chars().last() else {
        return "0".parse();
    };
    let multiplier = match last {
        'T' => 1024u64.pow(4),
        'G' => 1024u64.pow(3),
        'M' => 1024u64.pow(2),
        'K' => 1024,
        _ => return size.parse(),
    };
    let digits = &size[..size.len() - 1];
    Ok(digits.parse::<u64>()? * multiplier)
}

/// Given an estimated total upload size, compute a chunk size that keeps the
/// part count at or below 9999 while never going under 10 MiB (§6, §8 property 8).
pub fn optimize_chunksize(estimated: u64) -> u64 {
    const MAX_PARTS: f64 = 9999.0;
    const MIN_PART_SIZE: u64 = 10 * 1024 * 1024;
    let estimated = estimated as f64 * 1.05;
    let min_part_size = (estimated / MAX_PARTS).max(MIN_PART_SIZE as f64);
    min_part_size.ceil() as u64
}

/// A contiguous slice of input bytes carrying its 1-based read-order index (§3 "Chunk").
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u32,
    pub data: Bytes,
}

/// Pulls an async input stream into fixed-size byte chunks (C1).
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    eof: bool,
    next_index: u32,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, chunk_size: u64) -> Self {
        Self {
            reader,
            chunk_size: chunk_size as usize,
            eof: false,
            next_index: 1,
        }
    }

    pub fn finished(&self) -> bool {
        self.eof
    }

    /// Reads until exactly `chunk_size` bytes are buffered or the input
    /// reaches end-of-stream, then returns the buffered chunk. Returns
    /// `None` once a short final chunk has already been emitted.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, std::io::Error> {
        if self.eof {
            return Ok(None);
        }

        let mut buf = BytesMut::with_capacity(self.chunk_size);
        loop {
            let want = self.chunk_size - buf.len();
            let mut tmp = vec![0u8; want];
            let n = self.reader.read(&mut tmp).await?;
            if n == 0 {
                self.eof = true;
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if buf.len() == self.chunk_size {
                break;
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Chunk {
            index,
            data: buf.freeze(),
        }))
    }
}

/// A message published by a worker back to the coordinator.
enum WorkerResult {
    Uploaded {
        index: u32,
        md5_raw: [u8; 16],
        etag: String,
    },
    Fatal(UploaderError),
}

/// True if an S3 service error is worth retrying (§9 "Open question: retry classification").
/// 5xx, timeouts and dispatch failures are transient; 4xx auth/config errors fail fast.
fn is_retryable<E: ProvideErrorMetadata>(err: &SdkError<E>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => {
            let permanent = matches!(
                service_err.err().code(),
                Some(
                    "AccessDenied"
                        | "InvalidAccessKeyId"
                        | "SignatureDoesNotMatch"
                        | "NoSuchBucket"
                        | "InvalidArgument"
                        | "AccountProblem"
                )
            );
            !permanent
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ConstructionFailure(_) => false,
        _ => true,
    }
}

/// Uploads one chunk as a part, retrying transient failures up to `max_retries` times (C2).
async fn upload_part_with_retry(
    store: &ObjectStore,
    key: &str,
    upload_id: &str,
    chunk: &Chunk,
    max_retries: u32,
) -> Result<([u8; 16], String), UploaderError> {
    let md5_raw: [u8; 16] = Md5::digest(&chunk.data).into();
    let content_md5 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, md5_raw);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = store
            .client
            .upload_part()
            .bucket(&store.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(chunk.index as i32)
            .content_md5(&content_md5)
            .body(ByteStream::from(chunk.data.clone()))
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag = output.e_tag().unwrap_or_default().to_string();
                return Ok((md5_raw, etag));
            }
            Err(err) => {
                let retryable = is_retryable(&err);
                if !retryable || attempt >= max_retries {
                    return Err(UploaderError::UploadFatal {
                        index: chunk.index,
                        source: Box::new(err),
                    });
                }
                warn!(
                    index = chunk.index,
                    attempt, max_retries, "upload part failed, retrying: {err}"
                );
            }
        }
    }
}

/// A jobs receiver shared across worker tasks (`mpsc::Receiver` isn't `Clone`).
type SharedJobs = std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<Chunk>>>;

/// Runs the worker loop for one upload worker: pop jobs from the shared
/// queue until it's drained and closed, or a fatal error occurs (C2).
async fn run_worker(
    store: ObjectStore,
    key: String,
    upload_id: String,
    max_retries: u32,
    inbox: SharedJobs,
    outbox: mpsc::UnboundedSender<WorkerResult>,
) {
    loop {
        let chunk = {
            let mut guard = inbox.lock().await;
            guard.recv().await
        };
        let Some(chunk) = chunk else { return };
        match upload_part_with_retry(&store, &key, &upload_id, &chunk, max_retries).await {
            Ok((md5_raw, etag)) => {
                if outbox
                    .send(WorkerResult::Uploaded {
                        index: chunk.index,
                        md5_raw,
                        etag,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                let _ = outbox.send(WorkerResult::Fatal(e));
                return;
            }
        }
    }
}

/// Options for one multipart upload run.
pub struct UploadOptions {
    pub key: String,
    pub chunk_size: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub storage_class: Option<String>,
    pub metadata: HashMap<String, String>,
    pub verbosity: Verbosity,
}

/// Runs the full upload algorithm described in §4.3 and returns the
/// composite entity tag.
pub async fn run<R: AsyncRead + Unpin>(
    store: &ObjectStore,
    reader: R,
    opts: UploadOptions,
) -> Result<String, UploaderError> {
    let mut create = store
        .client
        .create_multipart_upload()
        .bucket(&store.bucket)
        .key(&opts.key)
        .acl(aws_sdk_s3::types::ObjectCannedAcl::BucketOwnerFullControl)
        .set_metadata(Some(opts.metadata.clone()));
    if let Some(ref class) = opts.storage_class {
        create = create.storage_class(aws_sdk_s3::types::StorageClass::from(class.as_str()));
    }
    let create_output = create
        .send()
        .await
        .map_err(|e| UploaderError::S3(e.to_string()))?;
    let upload_id = create_output
        .upload_id()
        .ok_or_else(|| UploaderError::S3("CreateMultipartUpload returned no upload_id".into()))?
        .to_string();

    info!(key = %opts.key, bucket = %store.bucket, upload_id = %upload_id, "multipart upload initiated");

    let (jobs_tx, jobs_rx_for_workers) = mpsc::channel::<Chunk>(opts.concurrency.max(1));
    let (results_tx, mut results_rx) = mpsc::unbounded_channel::<WorkerResult>();

    // Split the single receiver across `concurrency` worker tasks via a shared channel:
    // tokio::sync::mpsc::Receiver isn't Clone, so wrap it for fan-out.
    let jobs_rx = std::sync::Arc::new(tokio::sync::Mutex::new(jobs_rx_for_workers));

    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(opts.concurrency);
    for _ in 0..opts.concurrency {
        handles.push(tokio::spawn(run_worker(
            store.clone(),
            opts.key.clone(),
            upload_id.clone(),
            opts.max_retries,
            jobs_rx.clone(),
            results_tx.clone(),
        )));
    }
    drop(results_tx);

    let mut chunk_reader = ChunkReader::new(reader, opts.chunk_size);
    let mut pending: u64 = 0;
    let mut recorded: Vec<(u32, [u8; 16], String)> = Vec::new();

    let abort = |store: ObjectStore, key: String, upload_id: String| async move {
        let _ = store
            .client
            .abort_multipart_upload()
            .bucket(&store.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
    };

    loop {
        if handles.iter().any(|h| h.is_finished()) {
            abort(store.clone(), opts.key.clone(), upload_id.clone()).await;
            return Err(UploaderError::WorkerCrashed);
        }

        while let Ok(result) = results_rx.try_recv() {
            match result {
                WorkerResult::Uploaded {
                    index,
                    md5_raw,
                    etag,
                } => {
                    if opts.verbosity == Verbosity::Progress {
                        info!(index, "uploaded chunk");
                    }
                    recorded.push((index, md5_raw, etag));
                    pending -= 1;
                }
                WorkerResult::Fatal(e) => {
                    abort(store.clone(), opts.key.clone(), upload_id.clone()).await;
                    return Err(e);
                }
            }
        }

        if pending == 0 && chunk_reader.finished() {
            break;
        }

        if let Some(chunk) = chunk_reader.next_chunk().await? {
            pending += 1;
            let index = chunk.index;
            if jobs_tx.send(chunk).await.is_err() {
                abort(store.clone(), opts.key.clone(), upload_id.clone()).await;
                return Err(UploaderError::WorkerCrashed);
            }
            debug!(index, "enqueued chunk");
        }
    }

    drop(jobs_tx);
    // Drain any results published between the last non-blocking check and worker exit.
    while let Some(result) = results_rx.recv().await {
        match result {
            WorkerResult::Uploaded {
                index,
                md5_raw,
                etag,
            } => recorded.push((index, md5_raw, etag)),
            WorkerResult::Fatal(e) => {
                abort(store.clone(), opts.key.clone(), upload_id.clone()).await;
                return Err(e);
            }
        }
    }
    for handle in handles {
        let _ = handle.await;
    }

    if recorded.is_empty() {
        abort(store.clone(), opts.key.clone(), upload_id.clone()).await;
        return Err(UploaderError::ZeroByteInput);
    }

    recorded.sort_by_key(|(index, _, _)| *index);

    let parts: Vec<CompletedPart> = recorded
        .iter()
        .map(|(index, _, etag)| {
            CompletedPart::builder()
                .part_number(*index as i32)
                .e_tag(etag.clone())
                .build()
        })
        .collect();

    store
        .client
        .complete_multipart_upload()
        .bucket(&store.bucket)
        .key(&opts.key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build(),
        )
        .send()
        .await
        .map_err(|e| UploaderError::S3(e.to_string()))?;

    Ok(multipart_etag(recorded.iter().map(|(_, md5_raw, _)| *md5_raw)))
}

/// Computes the S3-style composite multipart etag: MD5 of the concatenation
/// of each part's raw MD5 bytes, followed by `-<part count>` (§3, §4.3, §8 property 2).
pub fn multipart_etag(raw_md5s: impl Iterator<Item = [u8; 16]>) -> String {
    let mut hasher = Md5::new();
    let mut count = 0usize;
    for raw in raw_md5s {
        hasher.update(raw);
        count += 1;
    }
    let digest = hasher.finalize();
    format!("'{}-{}'", hex::encode(digest), count)
}

/// Parse `key=value` metadata arguments, matching `--metadata` (§6 CLI surface).
pub fn parse_metadata_arg(arg: &str) -> Result<(String, String), std::io::Error> {
    arg.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("malformed metadata '{arg}'; should be key=value"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("2K").unwrap(), 2 * 1024);
        assert_eq!(parse_size("100").unwrap(), 100);
    }

    #[test]
    fn test_optimize_chunksize_respects_min() {
        let chunk = optimize_chunksize(1024);
        assert_eq!(chunk, 10 * 1024 * 1024);
    }

    #[test]
    fn test_optimize_chunksize_keeps_part_count_bounded() {
        let estimated = 100 * 1024u64.pow(3); // 100 GiB
        let chunk = optimize_chunksize(estimated);
        assert!(chunk as f64 * 9999.0 >= estimated as f64 * 1.05);
        assert!(chunk >= 10 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_chunk_reader_lossless_and_ordered() {
        let data = vec![0xABu8; 12 * 1024 * 1024];
        let mut reader = ChunkReader::new(Cursor::new(data.clone()), 5 * 1024 * 1024);
        let mut out = Vec::new();
        let mut sizes = Vec::new();
        let mut indices = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            indices.push(chunk.index);
            sizes.push(chunk.data.len());
            out.extend_from_slice(&chunk.data);
        }
        assert_eq!(out, data);
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(sizes, vec![5 * 1024 * 1024, 5 * 1024 * 1024, 2 * 1024 * 1024]);
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_reader_single_small_chunk() {
        let data = vec![0xABu8; 1024 * 1024];
        let mut reader = ChunkReader::new(Cursor::new(data.clone()), 5 * 1024 * 1024);
        let chunk = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.index, 1);
        assert_eq!(chunk.data.len(), 1024 * 1024);
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_reader_empty_input() {
        let mut reader = ChunkReader::new(Cursor::new(Vec::<u8>::new()), 5 * 1024 * 1024);
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[test]
    fn test_multipart_etag_deterministic() {
        let a = [1u8; 16];
        let b = [2u8; 16];
        let tag1 = multipart_etag(vec![a, b].into_iter());
        let tag2 = multipart_etag(vec![a, b].into_iter());
        assert_eq!(tag1, tag2);
        assert!(tag1.starts_with('\''));
        assert!(tag1.ends_with("-2'"));
    }

    #[test]
    fn test_parse_metadata_arg() {
        assert_eq!(
            parse_metadata_arg("isfull=true").unwrap(),
            ("isfull".to_string(), "true".to_string())
        );
        assert!(parse_metadata_arg("malformed").is_err());
    }
}
