//! Retraining job manager.
//!
//! `submit` validates the payload, registers a queued job and hands each
//! targeted capability's examples to that capability's lane. A lane is a
//! single task draining a FIFO queue in submission order. After running its
//! part of a job the lane waits until the whole job is terminal, so a later
//! job never starts on a capability while an earlier job that targets it is
//! still running elsewhere. Lanes share a semaphore that bounds the total
//! number of retrains in flight.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, error, info, warn};

use spendlens_ai::CapabilitySet;
use spendlens_core::{Capability, GatewayError, GatewayResult, JobId};

use super::store::{JobRegistry, JobRegistryError, JobStats};
use super::types::RetrainingJob;

#[derive(Debug, Clone)]
pub struct RetrainingConfig {
    pub max_concurrent: usize,
    pub estimate: Duration,
    pub retention: Duration,
    pub retention_max: usize,
    pub purge_interval: Duration,
}

impl Default for RetrainingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            estimate: Duration::from_secs(2 * 60 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            retention_max: 1000,
            purge_interval: Duration::from_secs(60),
        }
    }
}

/// Accepted submission.
#[derive(Debug, Clone)]
pub struct RetrainingSubmission {
    pub job: RetrainingJob,
    pub estimated_completion: DateTime<Utc>,
}

#[derive(Debug)]
struct LaneTask {
    job_id: JobId,
    examples: Vec<JsonValue>,
    /// Set once the owning job is terminal. Shared by all of its lane tasks.
    settled: Arc<watch::Sender<bool>>,
}

pub struct RetrainingJobManager {
    registry: Arc<dyn JobRegistry>,
    lanes: BTreeMap<Capability, mpsc::UnboundedSender<LaneTask>>,
    // Held across insert + enqueue so lane order equals submission order.
    submit_order: Mutex<()>,
    shutdown: watch::Sender<bool>,
    config: RetrainingConfig,
}

impl std::fmt::Debug for RetrainingJobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrainingJobManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Split a training payload into per-capability example lists.
///
/// Unknown keys are ignored. A known key must carry a non-empty array, and
/// at least one known key must be present.
pub fn parse_training_payload(
    payload: &JsonValue,
) -> GatewayResult<BTreeMap<Capability, Vec<JsonValue>>> {
    let object = payload
        .as_object()
        .ok_or_else(|| GatewayError::job_submission("training payload must be a JSON object"))?;

    let mut targeted: BTreeMap<Capability, Vec<JsonValue>> = BTreeMap::new();
    for (key, value) in object {
        let Some(capability) = Capability::from_training_key(key) else {
            debug!(key = %key, "ignoring unknown training key");
            continue;
        };
        let examples = value.as_array().ok_or_else(|| {
            GatewayError::job_submission(format!("`{key}` must be a list of training examples"))
        })?;
        if examples.is_empty() {
            return Err(GatewayError::job_submission(format!(
                "`{key}` has no training examples"
            )));
        }
        targeted
            .entry(capability)
            .or_default()
            .extend(examples.iter().cloned());
    }

    if targeted.is_empty() {
        return Err(GatewayError::job_submission(
            "payload does not reference any known capability",
        ));
    }
    Ok(targeted)
}

impl RetrainingJobManager {
    /// Reconcile jobs left over from a previous process, then start one lane
    /// per capability and the retention sweep. Must be called inside a Tokio
    /// runtime.
    pub fn start(
        capabilities: CapabilitySet,
        registry: Arc<dyn JobRegistry>,
        config: RetrainingConfig,
    ) -> Arc<Self> {
        match registry.reconcile_interrupted() {
            Ok(0) => {}
            Ok(n) => warn!(jobs = n, "marked unfinished retraining jobs as interrupted"),
            Err(e) => error!(error = %e, "could not reconcile retraining jobs"),
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        let mut lanes = BTreeMap::new();
        for capability in Capability::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.insert(capability, tx);
            tokio::spawn(lane_loop(
                capability,
                rx,
                capabilities.clone(),
                registry.clone(),
                permits.clone(),
                shutdown_rx.clone(),
            ));
        }
        tokio::spawn(purge_loop(registry.clone(), config.clone(), shutdown_rx));

        info!(
            max_concurrent = config.max_concurrent,
            "retraining job manager started"
        );
        Arc::new(Self {
            registry,
            lanes,
            submit_order: Mutex::new(()),
            shutdown,
            config,
        })
    }

    /// Validate and enqueue. Returns as soon as the job is registered.
    pub fn submit(&self, payload: &JsonValue) -> GatewayResult<RetrainingSubmission> {
        let targeted = parse_training_payload(payload)?;
        let job = RetrainingJob::new(targeted.iter().map(|(c, ex)| (*c, ex.len())).collect());
        let job_id = job.id;
        let settled = Arc::new(watch::channel(false).0);

        {
            let _order = self.submit_order.lock().unwrap();
            self.registry
                .insert(job.clone())
                .map_err(|e| GatewayError::job_submission(e.to_string()))?;

            for (capability, examples) in targeted {
                let sent = self
                    .lanes
                    .get(&capability)
                    .map(|lane| {
                        lane.send(LaneTask {
                            job_id,
                            examples,
                            settled: settled.clone(),
                        })
                        .is_ok()
                    })
                    .unwrap_or(false);
                if !sent {
                    warn!(job_id = %job_id, capability = %capability, "retraining lane closed");
                    let updated = self.registry.modify(job_id, &mut |j| {
                        j.finish_run(capability, Err("scheduler unavailable".to_string()))
                    });
                    if updated.is_ok_and(|j| j.state.is_terminal()) {
                        settled.send_replace(true);
                    }
                }
            }
        }

        info!(
            job_id = %job_id,
            capabilities = ?job.targeted_capabilities,
            "retraining job queued"
        );
        let estimate = chrono::Duration::from_std(self.config.estimate)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        Ok(RetrainingSubmission {
            job,
            estimated_completion: Utc::now() + estimate,
        })
    }

    pub fn job(&self, job_id: JobId) -> Result<Option<RetrainingJob>, JobRegistryError> {
        self.registry.get(job_id)
    }

    pub fn jobs(&self, limit: usize) -> Result<Vec<RetrainingJob>, JobRegistryError> {
        self.registry.list(limit)
    }

    pub fn stats(&self) -> Result<JobStats, JobRegistryError> {
        self.registry.stats()
    }

    /// Stop lanes after their current run and stop the retention sweep.
    /// Queued runs stay queued and are reconciled on the next start.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for RetrainingJobManager {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn lane_loop(
    capability: Capability,
    mut rx: mpsc::UnboundedReceiver<LaneTask>,
    capabilities: CapabilitySet,
    registry: Arc<dyn JobRegistry>,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let task = tokio::select! {
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let settled = task.settled.clone();
        {
            let Ok(_permit) = permits.acquire().await else {
                break;
            };
            if *shutdown.borrow() {
                break;
            }
            run_one(capability, task, &capabilities, registry.as_ref()).await;
        }

        tokio::select! {
            _ = job_settled(settled.subscribe()) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(capability = %capability, "retraining lane stopped");
}

async fn job_settled(mut settled: watch::Receiver<bool>) {
    loop {
        if *settled.borrow_and_update() {
            return;
        }
        if settled.changed().await.is_err() {
            return;
        }
    }
}

async fn run_one(
    capability: Capability,
    task: LaneTask,
    capabilities: &CapabilitySet,
    registry: &dyn JobRegistry,
) {
    let job_id = task.job_id;
    if let Err(e) = registry.modify(job_id, &mut |j| j.start_run(capability)) {
        warn!(job_id = %job_id, capability = %capability, error = %e, "cannot start retraining run");
        // Nothing will settle this job through this lane; release the gate.
        task.settled.send_replace(true);
        return;
    }
    info!(
        job_id = %job_id,
        capability = %capability,
        examples = task.examples.len(),
        "retraining started"
    );

    // Own task so a panicking provider fails this run instead of the lane.
    let caps = capabilities.clone();
    let examples = task.examples;
    let settled = task.settled;
    let outcome = match tokio::spawn(async move { caps.retrain(capability, examples).await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("retraining task aborted: {e}")),
    };

    match &outcome {
        Ok(()) => info!(job_id = %job_id, capability = %capability, "retraining succeeded"),
        Err(reason) => warn!(job_id = %job_id, capability = %capability, reason = %reason, "retraining failed"),
    }
    let mut outcome = Some(outcome);
    let result = registry.modify(job_id, &mut |j| {
        j.finish_run(capability, outcome.take().unwrap_or(Ok(())))
    });
    match result {
        Ok(job) if job.state.is_terminal() => {
            info!(job_id = %job_id, state = %job.state, "retraining job finished");
            settled.send_replace(true);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(job_id = %job_id, capability = %capability, error = %e, "cannot record retraining outcome");
            settled.send_replace(true);
        }
    }
}

async fn purge_loop(
    registry: Arc<dyn JobRegistry>,
    config: RetrainingConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(config.purge_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let retention = chrono::Duration::from_std(config.retention)
        .unwrap_or_else(|_| chrono::Duration::hours(24));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match registry.purge_expired(Utc::now() - retention, config.retention_max) {
                    Ok(0) => {}
                    Ok(n) => debug!(purged = n, "purged expired retraining jobs"),
                    Err(e) => warn!(error = %e, "retraining job purge failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
