//! `spendlens-core`: data model shared by the inference gateway.
//!
//! Pure types only (no runtime, no IO): expenses, capability outputs,
//! identifiers and the gateway error taxonomy.

pub mod capability;
pub mod error;
pub mod expense;
pub mod id;
pub mod insight;
pub mod receipt;

pub use capability::Capability;
pub use error::{GatewayError, GatewayResult};
pub use expense::ExpenseRecord;
pub use id::{ArtifactId, JobId, SessionId};
pub use insight::{
    ApprovalEstimate, ApprovalRecord, CategoryPrediction, CompanyPolicies, ConfidenceInterval,
    ExpenseMetadata, FraudAlert, MonthlyProjection, PredictionResult, RiskLevel, TagSet,
    TrendGranularity, TrendPeriod, TrendReport,
};
pub use receipt::{ArtifactRef, AuthenticityVerdict, OcrResult, ReceiptFields, ValidationResult};
