//! Transient artifact store.
//!
//! Uploaded receipts live on disk only for the duration of one request.
//! [`TransientArtifactStore::scoped`] is the entry point: it writes the bytes,
//! hands the caller an [`ArtifactRef`] and deletes the file on every exit
//! path. If the surrounding future is dropped mid-scope the handle's `Drop`
//! removes the file instead.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use spendlens_core::{ArtifactId, ArtifactRef, GatewayError, GatewayResult};

const MAX_NAME_LEN: usize = 64;
const DEFAULT_NAME: &str = "upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ArtifactStats {
    pub acquired: u64,
    pub released: u64,
    /// Releases whose unlink failed. Those files are still on disk.
    pub release_failures: u64,
    /// Acquired and not yet removed, leftovers from failed releases included.
    pub outstanding: u64,
}

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    release_failures: AtomicU64,
}

impl Counters {
    fn record_release(&self, removed: bool) {
        let counter = if removed {
            &self.released
        } else {
            &self.release_failures
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct TransientArtifactStore {
    root: PathBuf,
    counters: Arc<Counters>,
}

/// Owned claim on one stored artifact. Released exactly once.
#[derive(Debug)]
pub struct ArtifactHandle {
    artifact: ArtifactRef,
    counters: Arc<Counters>,
    released: bool,
}

impl ArtifactHandle {
    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn path(&self) -> &Path {
        &self.artifact.path
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.artifact.path) {
            Ok(()) => {
                self.counters.record_release(true);
                debug!(artifact_id = %self.artifact.id, "artifact removed on drop");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => self.counters.record_release(true),
            Err(e) => {
                self.counters.record_release(false);
                warn!(artifact_id = %self.artifact.id, error = %e, "artifact drop cleanup failed");
            }
        }
    }
}

/// Files this store writes are named `<ArtifactId>-<sanitized name>`.
fn is_artifact_file_name(name: &str) -> bool {
    let Some(id) = name.get(..36) else {
        return false;
    };
    name[36..].starts_with('-') && id.parse::<ArtifactId>().is_ok()
}

/// Keep `[A-Za-z0-9._-]`, cap the length, never return an empty or dot-only name.
pub fn sanitize_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.chars().all(|c| c == '.' || c == '_') {
        DEFAULT_NAME.to_string()
    } else {
        cleaned
    }
}

impl TransientArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create the root directory and delete leftovers from a previous process.
    /// Files not named like one of our artifacts are left alone.
    pub async fn prepare(&self) -> GatewayResult<usize> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| GatewayError::artifact(format!("create {}: {e}", self.root.display())))?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| GatewayError::artifact(format!("read {}: {e}", self.root.display())))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let ours = entry.file_name().to_str().is_some_and(is_artifact_file_name);
            if !ours {
                continue;
            }
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(removed, root = %self.root.display(), "swept stale artifacts");
        }
        Ok(removed)
    }

    pub async fn acquire(&self, bytes: &[u8], suggested_name: &str) -> GatewayResult<ArtifactHandle> {
        let id = ArtifactId::new();
        let file_name = format!("{id}-{}", sanitize_name(suggested_name));
        let path = self.root.join(file_name);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                warn!(artifact_id = %id, error = %e, "artifact create failed");
                GatewayError::artifact("could not store upload")
            })?;

        // From here on the handle owns the file, so a failed write still cleans up.
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let handle = ArtifactHandle {
            artifact: ArtifactRef {
                id,
                path,
                original_name: suggested_name.to_string(),
                size: bytes.len(),
            },
            counters: self.counters.clone(),
            released: false,
        };

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(artifact_id = %id, error = %e, "artifact write failed");
            // Dropping the handle removes the partial file.
            drop(handle);
            return Err(GatewayError::artifact("could not store upload"));
        }

        debug!(artifact_id = %id, size = bytes.len(), "artifact acquired");
        Ok(handle)
    }

    /// Delete the artifact. A file that is already gone counts as released.
    pub async fn release(&self, mut handle: ArtifactHandle) -> GatewayResult<()> {
        handle.released = true;
        let result = tokio::fs::remove_file(handle.path()).await;
        let removed = match &result {
            Ok(()) => true,
            Err(e) => e.kind() == ErrorKind::NotFound,
        };
        self.counters.record_release(removed);
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GatewayError::artifact(format!(
                "release {}: {e}",
                handle.artifact.id
            ))),
        }
    }

    /// Acquire, run `f`, release. Release failures are logged and never
    /// replace the result of `f`.
    pub async fn scoped<T, F, Fut>(&self, bytes: &[u8], suggested_name: &str, f: F) -> GatewayResult<T>
    where
        F: FnOnce(ArtifactRef) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let handle = self.acquire(bytes, suggested_name).await?;
        let result = f(handle.artifact().clone()).await;
        let artifact_id = handle.artifact().id;
        if let Err(e) = self.release(handle).await {
            warn!(artifact_id = %artifact_id, error = %e, "artifact release failed");
        }
        result
    }

    pub fn stats(&self) -> ArtifactStats {
        let acquired = self.counters.acquired.load(Ordering::SeqCst);
        let released = self.counters.released.load(Ordering::SeqCst);
        ArtifactStats {
            acquired,
            released,
            release_failures: self.counters.release_failures.load(Ordering::SeqCst),
            outstanding: acquired.saturating_sub(released),
        }
    }
}
