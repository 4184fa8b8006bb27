//! Gateway error taxonomy.

use thiserror::Error;

use crate::capability::Capability;

/// Result type used across the orchestration layer.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Orchestration-level error.
///
/// Every failure that crosses the router/dispatcher boundary is expressed as one
/// of these variants. Provider diagnostics stay in the logs; the variants only
/// carry what a caller is allowed to see.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Client-supplied structural or range violation. No capability was invoked.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A capability provider failed while executing.
    #[error("{capability} failed: {message}")]
    CapabilityFailure {
        capability: Capability,
        message: String,
    },

    /// A capability provider did not complete within its budget.
    #[error("{capability} timed out after {timeout_ms}ms")]
    CapabilityTimeout {
        capability: Capability,
        timeout_ms: u64,
    },

    /// Transient artifact acquisition or release failed.
    #[error("artifact error: {0}")]
    ArtifactError(String),

    /// Malformed retraining payload.
    #[error("job submission rejected: {0}")]
    JobSubmissionError(String),

    /// Unrecoverable realtime transport framing issue.
    #[error("session protocol error: {0}")]
    SessionProtocolError(String),
}

impl GatewayError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn capability_failure(capability: Capability, msg: impl Into<String>) -> Self {
        Self::CapabilityFailure {
            capability,
            message: msg.into(),
        }
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::ArtifactError(msg.into())
    }

    pub fn job_submission(msg: impl Into<String>) -> Self {
        Self::JobSubmissionError(msg.into())
    }

    pub fn session_protocol(msg: impl Into<String>) -> Self {
        Self::SessionProtocolError(msg.into())
    }

    /// Stable machine-readable code, used in per-item results and error frames.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::CapabilityFailure { .. } => "capability_failure",
            GatewayError::CapabilityTimeout { .. } => "capability_timeout",
            GatewayError::ArtifactError(_) => "artifact_error",
            GatewayError::JobSubmissionError(_) => "job_submission_error",
            GatewayError::SessionProtocolError(_) => "session_protocol_error",
        }
    }

    /// The capability an error is attributed to, if any.
    pub fn capability(&self) -> Option<Capability> {
        match self {
            GatewayError::CapabilityFailure { capability, .. }
            | GatewayError::CapabilityTimeout { capability, .. } => Some(*capability),
            _ => None,
        }
    }
}
