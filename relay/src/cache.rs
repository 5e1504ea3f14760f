//! Blob retrieval through a content-addressed cache.
//!
//! Cache files are named by the package's strongest digest, so a hit needs
//! no freshness check. On a miss the artifact is reopened at its original
//! source via the stored restore location and teed to disk while it
//! streams to the client; the response never waits for, and never fails
//! because of, the cache write.

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::index::IndexEntry;
use crate::sources::{self, ArtifactStream, SourceContext};
use apt_repository::DigestAlgorithm;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// The local `.deb` cache. A `None` root disables caching entirely.
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: Option<PathBuf>,
}

impl BlobCache {
    /// Create a cache rooted at the given directory, or a pass-through
    /// when no directory is configured.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Open the artifact bytes for an index entry: cache hit, or
    /// read-through from the original source.
    pub async fn open(
        &self,
        ctx: &SourceContext,
        config: &Config,
        entry: &IndexEntry,
    ) -> RelayResult<ArtifactStream> {
        if let Some(root) = &self.root {
            for &algorithm in DigestAlgorithm::preference() {
                let Some(digest) = entry.control.digest(algorithm) else {
                    continue;
                };
                let path = root.join(format!("{digest}.deb"));
                if let Ok(file) = tokio::fs::File::open(&path).await {
                    debug!(path = %path.display(), "cache hit");
                    return Ok(Box::new(file));
                }
            }
        }

        let source = config
            .find_source(&entry.repository_id)
            .ok_or_else(|| RelayError::SourceUnavailable(entry.repository_id.clone()))?;
        let upstream = sources::open(ctx, source.descriptor, &entry.restore).await?;

        match (&self.root, entry.control.strongest_digest()) {
            (Some(root), Some((_, digest))) => {
                Ok(tee_to_cache(upstream, root.clone(), digest.to_string()))
            }
            _ => Ok(upstream),
        }
    }
}

struct CacheSink {
    temp: NamedTempFile,
    file: tokio::fs::File,
    dest: PathBuf,
}

impl CacheSink {
    async fn create(root: &Path, digest: &str) -> Option<Self> {
        if let Err(err) = tokio::fs::create_dir_all(root).await {
            warn!(root = %root.display(), %err, "cannot create cache directory");
            return None;
        }
        let dir = root.to_path_buf();
        let temp = match tokio::task::spawn_blocking(move || NamedTempFile::new_in(dir)).await {
            Ok(Ok(temp)) => temp,
            Ok(Err(err)) => {
                warn!(%err, "cannot create cache temp file");
                return None;
            }
            Err(err) => {
                warn!(%err, "cache temp file task failed");
                return None;
            }
        };
        let file = match temp.reopen() {
            Ok(file) => tokio::fs::File::from_std(file),
            Err(err) => {
                warn!(%err, "cannot reopen cache temp file");
                return None;
            }
        };
        Some(Self {
            temp,
            file,
            dest: root.join(format!("{digest}.deb")),
        })
    }

    async fn commit(mut self) {
        if let Err(err) = self.file.flush().await {
            warn!(%err, "cache flush failed");
            return;
        }
        drop(self.file);
        let dest = self.dest;
        let temp = self.temp;
        let result = tokio::task::spawn_blocking(move || temp.persist(&dest)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(%err, "cache persist failed"),
            Err(err) => warn!(%err, "cache persist task failed"),
        }
    }
}

/// Forward the upstream bytes to the caller through a bounded channel
/// while writing them to a temp file that is renamed into place once the
/// stream completes. Cache-side failures only disable the write; an
/// aborted client discards the partial file.
pub(crate) fn tee_to_cache(
    mut upstream: ArtifactStream,
    root: PathBuf,
    digest: String,
) -> ArtifactStream {
    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(16);

    tokio::spawn(async move {
        let mut sink = CacheSink::create(&root, &digest).await;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match upstream.read(&mut buf).await {
                Ok(0) => {
                    if let Some(sink) = sink.take() {
                        sink.commit().await;
                    }
                    return;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if tx.send(Ok(chunk.clone())).await.is_err() {
                        // Client hung up; the temp file drops and with it
                        // the incomplete cache entry.
                        return;
                    }
                    let mut write_failed = false;
                    if let Some(active) = sink.as_mut() {
                        if let Err(err) = active.file.write_all(&chunk).await {
                            warn!(%err, "cache write failed, continuing uncached");
                            write_failed = true;
                        }
                    }
                    if write_failed {
                        sink = None;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    });

    Box::new(StreamReader::new(ReceiverStream::new(rx)))
}
