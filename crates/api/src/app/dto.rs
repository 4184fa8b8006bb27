use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use spendlens_core::{
    ApprovalRecord, Capability, CategoryPrediction, CompanyPolicies, ExpenseRecord, JobId,
    TrendReport,
};
use spendlens_infra::jobs::{JobState, RetrainingSubmission};
use spendlens_infra::router::{BatchItem, CapabilityErrorView};

use crate::app::errors;

/// `Json` with body rejections reported as `invalid_request`.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = axum::response::Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return errors::json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            rejection.body_text(),
        );
    }
    errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct DetectFraudRequest {
    pub expense: ExpenseRecord,
    #[serde(default)]
    pub user_history: Option<Vec<ExpenseRecord>>,
}

#[derive(Debug, Deserialize)]
pub struct RiskAssessmentRequest {
    pub expense: ExpenseRecord,
    #[serde(default)]
    pub company_policies: CompanyPolicies,
}

fn default_prediction_months() -> i64 {
    3
}

#[derive(Debug, Deserialize)]
pub struct PredictBudgetRequest {
    pub historical_data: Vec<ExpenseRecord>,
    #[serde(default = "default_prediction_months")]
    pub prediction_months: i64,
}

fn default_analysis_type() -> String {
    "monthly".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeTrendsRequest {
    pub expenses: Vec<ExpenseRecord>,
    #[serde(default = "default_analysis_type")]
    pub analysis_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalTimeRequest {
    pub expense: ExpenseRecord,
    #[serde(default)]
    pub approval_history: Vec<ApprovalRecord>,
}

fn default_enhance_image() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct OcrQuery {
    #[serde(default = "default_enhance_image")]
    pub enhance_image: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    Error,
}

/// One position of a batch response.
#[derive(Debug, Serialize)]
pub struct BatchItemView {
    pub index: usize,
    pub expense_id: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CategoryPrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CapabilityErrorView>,
}

impl From<BatchItem<CategoryPrediction>> for BatchItemView {
    fn from(item: BatchItem<CategoryPrediction>) -> Self {
        let (status, result, error) = match item.outcome {
            Ok(prediction) => (ItemStatus::Ok, Some(prediction), None),
            Err(e) => (ItemStatus::Error, None, Some(CapabilityErrorView::from(&e))),
        };
        Self {
            index: item.index,
            expense_id: item.expense_id,
            status,
            result,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrendsResponse {
    pub trends: TrendReport,
    pub analysis_type: String,
}

#[derive(Debug, Serialize)]
pub struct ApprovalTimeResponse {
    pub estimated_hours: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RetrainAccepted {
    pub job_id: JobId,
    pub status: JobState,
    pub targeted_capabilities: Vec<Capability>,
    pub estimated_completion: DateTime<Utc>,
    pub message: String,
}

impl From<RetrainingSubmission> for RetrainAccepted {
    fn from(submission: RetrainingSubmission) -> Self {
        let targeted: Vec<Capability> =
            submission.job.targeted_capabilities.iter().copied().collect();
        let names: Vec<&str> = targeted.iter().map(Capability::as_str).collect();
        Self {
            job_id: submission.job.id,
            status: submission.job.state,
            message: format!("Retraining queued for: {}", names.join(", ")),
            targeted_capabilities: targeted,
            estimated_completion: submission.estimated_completion,
        }
    }
}
