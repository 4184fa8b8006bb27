//! Job registry implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;

use spendlens_core::{Capability, JobId};

use super::types::{INTERRUPTED, JobState, RetrainingJob};

/// Job registry abstraction. The registry is the only owner of job state.
pub trait JobRegistry: Send + Sync {
    fn insert(&self, job: RetrainingJob) -> Result<JobId, JobRegistryError>;

    fn get(&self, job_id: JobId) -> Result<Option<RetrainingJob>, JobRegistryError>;

    /// Most recently submitted first.
    fn list(&self, limit: usize) -> Result<Vec<RetrainingJob>, JobRegistryError>;

    /// Apply `f` to the stored job under the registry lock and return the
    /// updated copy. Errors from `f` leave the job unchanged.
    fn modify(
        &self,
        job_id: JobId,
        f: &mut dyn FnMut(&mut RetrainingJob) -> Result<(), JobRegistryError>,
    ) -> Result<RetrainingJob, JobRegistryError>;

    /// Drop terminal jobs completed before `older_than`, then the oldest
    /// terminal jobs beyond `max_terminal`. Returns how many were removed.
    fn purge_expired(
        &self,
        older_than: DateTime<Utc>,
        max_terminal: usize,
    ) -> Result<usize, JobRegistryError>;

    /// Fail every non-terminal job. Used once at startup.
    fn reconcile_interrupted(&self) -> Result<usize, JobRegistryError>;

    fn stats(&self) -> Result<JobStats, JobRegistryError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobRegistryError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} has no {1} run")]
    UnknownRun(JobId, Capability),
    #[error("job {job_id}: {capability} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        capability: Capability,
        from: JobState,
        to: JobState,
    },
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// In-memory registry, optionally mirrored to a JSON snapshot file.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<JobId, RetrainingJob>>,
    snapshot: Option<SnapshotSink>,
}

/// Hands serialized snapshots to the writer task. Only the latest pending
/// snapshot is kept; each one is a full copy of the registry.
#[derive(Debug)]
struct SnapshotSink {
    version: Mutex<u64>,
    pending: watch::Sender<(u64, Arc<Vec<u8>>)>,
    written: watch::Receiver<u64>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry backed by `path`. Existing jobs are loaded from it and later
    /// changes are written by a background task. Requires a Tokio runtime.
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, JobRegistryError> {
        let path = path.into();
        let jobs = load_snapshot(&path).await?;

        let (pending, pending_rx) = watch::channel((0, Arc::new(Vec::new())));
        let (written_tx, written) = watch::channel(0);
        tokio::spawn(snapshot_writer(path, pending_rx, written_tx));

        Ok(Self {
            jobs: RwLock::new(jobs.into_iter().map(|j| (j.id, j)).collect()),
            snapshot: Some(SnapshotSink {
                version: Mutex::new(0),
                pending,
                written,
            }),
        })
    }

    /// Wait until every change made so far has reached the snapshot file.
    pub async fn flush(&self) {
        let Some(sink) = &self.snapshot else {
            return;
        };
        let target = *sink.version.lock().unwrap();
        let mut written = sink.written.clone();
        while *written.borrow_and_update() < target {
            if written.changed().await.is_err() {
                break;
            }
        }
    }

    /// Snapshot writes are best effort: the in-memory state stays
    /// authoritative and a failed write is only logged.
    fn persist(&self) {
        let Some(sink) = &self.snapshot else {
            return;
        };
        // Held while copying so versions follow the order of the changes.
        let mut version = sink.version.lock().unwrap();
        let mut jobs: Vec<RetrainingJob> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.submitted_at);

        match serde_json::to_vec_pretty(&jobs) {
            Ok(body) => {
                *version += 1;
                sink.pending.send_replace((*version, Arc::new(body)));
            }
            Err(e) => warn!(error = %e, "job snapshot encoding failed"),
        }
    }
}

async fn snapshot_writer(
    path: PathBuf,
    mut pending: watch::Receiver<(u64, Arc<Vec<u8>>)>,
    written: watch::Sender<u64>,
) {
    while pending.changed().await.is_ok() {
        let (version, body) = pending.borrow_and_update().clone();
        if let Err(e) = write_snapshot(&path, &body).await {
            warn!(error = %e, "job snapshot write failed");
        }
        written.send_replace(version);
    }
}

async fn write_snapshot(path: &Path, body: &[u8]) -> Result<(), JobRegistryError> {
    let tmp = path.with_extension("json.tmp");
    let result = match tokio::fs::write(&tmp, body).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    result.map_err(|e| JobRegistryError::Snapshot(format!("{}: {e}", path.display())))
}

async fn load_snapshot(path: &Path) -> Result<Vec<RetrainingJob>, JobRegistryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| JobRegistryError::Snapshot(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(JobRegistryError::Snapshot(format!("{}: {e}", path.display()))),
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn insert(&self, job: RetrainingJob) -> Result<JobId, JobRegistryError> {
        let id = job.id;
        {
            let mut jobs = self.jobs.write().unwrap();
            if jobs.contains_key(&id) {
                return Err(JobRegistryError::AlreadyExists(id));
            }
            jobs.insert(id, job);
        }
        self.persist();
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<RetrainingJob>, JobRegistryError> {
        Ok(self.jobs.read().unwrap().get(&job_id).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<RetrainingJob>, JobRegistryError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs.values().cloned().collect();
        // v7 ids are time ordered; break submitted_at ties with them.
        result.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }

    fn modify(
        &self,
        job_id: JobId,
        f: &mut dyn FnMut(&mut RetrainingJob) -> Result<(), JobRegistryError>,
    ) -> Result<RetrainingJob, JobRegistryError> {
        let updated = {
            let mut jobs = self.jobs.write().unwrap();
            let job = jobs.get_mut(&job_id).ok_or(JobRegistryError::NotFound(job_id))?;
            let mut draft = job.clone();
            f(&mut draft)?;
            *job = draft;
            job.clone()
        };
        self.persist();
        Ok(updated)
    }

    fn purge_expired(
        &self,
        older_than: DateTime<Utc>,
        max_terminal: usize,
    ) -> Result<usize, JobRegistryError> {
        let removed = {
            let mut jobs = self.jobs.write().unwrap();
            let before = jobs.len();
            jobs.retain(|_, j| {
                !(j.state.is_terminal() && j.completed_at.is_some_and(|t| t < older_than))
            });

            let mut terminal: Vec<(DateTime<Utc>, JobId)> = jobs
                .values()
                .filter(|j| j.state.is_terminal())
                .map(|j| (j.completed_at.unwrap_or(j.submitted_at), j.id))
                .collect();
            if terminal.len() > max_terminal {
                terminal.sort();
                let excess = terminal.len() - max_terminal;
                for (_, id) in terminal.into_iter().take(excess) {
                    jobs.remove(&id);
                }
            }
            before - jobs.len()
        };
        if removed > 0 {
            self.persist();
        }
        Ok(removed)
    }

    fn reconcile_interrupted(&self) -> Result<usize, JobRegistryError> {
        let reconciled = {
            let mut jobs = self.jobs.write().unwrap();
            let mut n = 0;
            for job in jobs.values_mut().filter(|j| !j.state.is_terminal()) {
                job.interrupt(INTERRUPTED);
                n += 1;
            }
            n
        };
        if reconciled > 0 {
            self.persist();
        }
        Ok(reconciled)
    }

    fn stats(&self) -> Result<JobStats, JobRegistryError> {
        let jobs = self.jobs.read().unwrap();
        let mut stats = JobStats::default();
        for job in jobs.values() {
            match job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Running => stats.running += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
