//! Local staging of relayed files
//!
//! Every relay streams its download into one file under a shared staging
//! directory. `StagingStore::allocate` hands out a `StagingFile` guard with a
//! path no other request can receive. The guard is released explicitly at
//! the end of the relay; if a request is cancelled first, `Drop` removes the
//! file instead.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Leading bytes kept for content validation.
pub const SAMPLE_LEN: usize = 16;

const FILE_PREFIX: &str = "relay";

/// Shared staging directory plus the process-local sequence for unique names.
#[derive(Debug)]
pub struct StagingStore {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl StagingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Reserve a fresh staging path.
    ///
    /// The file itself is created by whoever writes the download. The name
    /// combines a nanosecond timestamp, the pid and a sequence number, so two
    /// allocations never collide even within the same clock tick.
    pub async fn allocate(&self) -> std::io::Result<StagingFile> {
        self.ensure_dir().await?;
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!("{FILE_PREFIX}-{nanos}-{}-{seq}.pdf", std::process::id());
        let path = self.dir.join(name);
        debug!(path = %path.display(), "staging file allocated");
        Ok(StagingFile {
            path,
            released: false,
        })
    }
}

/// Size and leading bytes of a staged download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedContent {
    pub size_bytes: u64,
    pub content_sample: Vec<u8>,
}

/// Scoped ownership of one staging path.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    released: bool,
}

impl StagingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size plus up to `SAMPLE_LEN` leading bytes.
    ///
    /// A download that never created the file reads as empty.
    pub async fn inspect(&self) -> std::io::Result<StagedContent> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(StagedContent {
                    size_bytes: 0,
                    content_sample: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };
        let size_bytes = file.metadata().await?.len();

        let mut content_sample = Vec::with_capacity(SAMPLE_LEN);
        (&mut file)
            .take(SAMPLE_LEN as u64)
            .read_to_end(&mut content_sample)
            .await?;

        Ok(StagedContent {
            size_bytes,
            content_sample,
        })
    }

    /// Whole staged payload, for the upload step.
    pub async fn read_all(&self) -> std::io::Result<bytes::Bytes> {
        tokio::fs::read(&self.path).await.map(bytes::Bytes::from)
    }

    /// Delete the staging file. Returns false when deletion failed.
    ///
    /// Failure is logged and counted but never surfaces as a relay error.
    pub async fn release(mut self) -> bool {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "staging file removed");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                cleanup_failed(&self.path, &e);
                false
            }
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staging file removed on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => cleanup_failed(&self.path, &e),
        }
    }
}

fn cleanup_failed(path: &Path, err: &std::io::Error) {
    warn!(path = %path.display(), error = %err, "failed to remove staging file");
    crate::metrics::record_cleanup_failure();
}
