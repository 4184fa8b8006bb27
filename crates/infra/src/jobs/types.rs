//! Retraining job types and state transitions.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spendlens_core::{Capability, JobId};

use super::store::JobRegistryError;

/// Reason recorded on jobs that were queued or running when the process stopped.
pub const INTERRUPTED: &str = "interrupted";

/// Lifecycle of a job and of each per-capability run inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// `queued -> running -> {succeeded | failed}`, plus `queued -> failed`
    /// for runs that never got to start.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One capability's share of a retraining job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRun {
    pub state: JobState,
    pub example_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl CapabilityRun {
    pub fn queued(example_count: usize) -> Self {
        Self {
            state: JobState::Queued,
            example_count,
            started_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainingJob {
    pub id: JobId,
    pub targeted_capabilities: BTreeSet<Capability>,
    pub state: JobState,
    pub runs: BTreeMap<Capability, CapabilityRun>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl RetrainingJob {
    /// New queued job with one run per targeted capability.
    pub fn new(example_counts: BTreeMap<Capability, usize>) -> Self {
        Self {
            id: JobId::new(),
            targeted_capabilities: example_counts.keys().copied().collect(),
            state: JobState::Queued,
            runs: example_counts
                .into_iter()
                .map(|(cap, n)| (cap, CapabilityRun::queued(n)))
                .collect(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }

    /// Mark one capability's run as started. The job enters `running` with
    /// its first run.
    pub fn start_run(&mut self, capability: Capability) -> Result<(), JobRegistryError> {
        let now = Utc::now();
        self.transition_run(capability, JobState::Running, None, now)?;
        if self.state == JobState::Queued {
            self.state = JobState::Running;
            self.started_at = Some(now);
        }
        Ok(())
    }

    /// Record a run outcome. Once every run is terminal the job itself
    /// becomes terminal.
    pub fn finish_run(
        &mut self,
        capability: Capability,
        outcome: Result<(), String>,
    ) -> Result<(), JobRegistryError> {
        let now = Utc::now();
        match outcome {
            Ok(()) => self.transition_run(capability, JobState::Succeeded, None, now)?,
            Err(reason) => self.transition_run(capability, JobState::Failed, Some(reason), now)?,
        }
        self.settle(now);
        Ok(())
    }

    /// Fail everything that has not finished.
    pub fn interrupt(&mut self, reason: &str) {
        let now = Utc::now();
        for run in self.runs.values_mut() {
            if !run.state.is_terminal() {
                run.state = JobState::Failed;
                run.completed_at = Some(now);
                run.failure_reason = Some(reason.to_string());
            }
        }
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
            self.completed_at = Some(now);
            self.failure_reason = Some(reason.to_string());
        }
    }

    fn transition_run(
        &mut self,
        capability: Capability,
        next: JobState,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), JobRegistryError> {
        let run = self
            .runs
            .get_mut(&capability)
            .ok_or(JobRegistryError::UnknownRun(self.id, capability))?;
        if !run.state.can_transition_to(next) {
            return Err(JobRegistryError::InvalidTransition {
                job_id: self.id,
                capability,
                from: run.state,
                to: next,
            });
        }
        run.state = next;
        match next {
            JobState::Running => run.started_at = Some(now),
            _ => {
                run.completed_at = Some(now);
                run.failure_reason = reason;
            }
        }
        Ok(())
    }

    fn settle(&mut self, now: DateTime<Utc>) {
        if self.state.is_terminal() || !self.runs.values().all(|r| r.state.is_terminal()) {
            return;
        }
        let failed: Vec<&str> = self
            .runs
            .iter()
            .filter(|(_, r)| r.state == JobState::Failed)
            .map(|(cap, _)| cap.as_str())
            .collect();
        self.completed_at = Some(now);
        if failed.is_empty() {
            self.state = JobState::Succeeded;
        } else {
            self.state = JobState::Failed;
            self.failure_reason = Some(format!("retraining failed for: {}", failed.join(", ")));
        }
    }
}
