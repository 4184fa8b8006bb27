//! Background model retraining.
//!
//! ## Components
//!
//! - `RetrainingJob`: one submission, with a run per targeted capability
//! - `JobRegistry`: owner of job state (in-memory, optional JSON snapshot)
//! - `RetrainingJobManager`: validation, per-capability lanes, retention

pub mod manager;
pub mod store;
pub mod types;

pub use manager::{
    RetrainingConfig, RetrainingJobManager, RetrainingSubmission, parse_training_payload,
};
pub use store::{InMemoryJobRegistry, JobRegistry, JobRegistryError, JobStats};
pub use types::{CapabilityRun, INTERRUPTED, JobState, RetrainingJob};
