use async_trait::async_trait;
use serde_json::Value as JsonValue;

use spendlens_core::{
    ApprovalEstimate, ApprovalRecord, ArtifactRef, CategoryPrediction,
    CompanyPolicies, ExpenseMetadata, ExpenseRecord, FraudAlert, OcrResult, PredictionResult,
    TagSet, TrendGranularity, TrendReport, ValidationResult,
};

use crate::error::ProviderError;

/// Operations every capability exposes regardless of what it computes.
///
/// Providers are treated as stateless by the gateway: they must be safe to call
/// concurrently from many requests. `retrain` is the exception the gateway
/// serializes per capability.
#[async_trait]
pub trait CapabilityProvider: Send + Sync + 'static {
    /// Model quality figure for observability (accuracy, precision, MAE...).
    async fn accuracy_metric(&self) -> Result<f64, ProviderError>;

    /// Liveness probe.
    async fn health(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Update the model from new training examples. May take a long time.
    async fn retrain(&self, examples: Vec<JsonValue>) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait CategorizationProvider: CapabilityProvider {
    async fn predict(&self, expense: &ExpenseRecord) -> Result<CategoryPrediction, ProviderError>;

    async fn batch_predict(
        &self,
        expenses: &[ExpenseRecord],
    ) -> Result<Vec<CategoryPrediction>, ProviderError> {
        let mut out = Vec::with_capacity(expenses.len());
        for expense in expenses {
            out.push(self.predict(expense).await?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait FraudDetectionProvider: CapabilityProvider {
    async fn analyze(
        &self,
        expense: &ExpenseRecord,
        history: Option<&[ExpenseRecord]>,
    ) -> Result<FraudAlert, ProviderError>;

    /// Policy-aware risk score in \[0, 1\].
    async fn risk_score(
        &self,
        expense: &ExpenseRecord,
        policies: &CompanyPolicies,
    ) -> Result<f64, ProviderError>;
}

#[async_trait]
pub trait PredictiveAnalyticsProvider: CapabilityProvider {
    async fn forecast_budget(
        &self,
        history: &[ExpenseRecord],
        horizon_months: u8,
    ) -> Result<PredictionResult, ProviderError>;

    async fn analyze_trends(
        &self,
        expenses: &[ExpenseRecord],
        granularity: TrendGranularity,
    ) -> Result<TrendReport, ProviderError>;

    async fn predict_approval_time(
        &self,
        expense: &ExpenseRecord,
        approval_history: &[ApprovalRecord],
    ) -> Result<ApprovalEstimate, ProviderError>;
}

#[async_trait]
pub trait ReceiptValidationProvider: CapabilityProvider {
    async fn validate(&self, artifact: &ArtifactRef) -> Result<ValidationResult, ProviderError>;
}

#[async_trait]
pub trait OcrProvider: CapabilityProvider {
    async fn process(&self, artifact: &ArtifactRef, enhance: bool)
    -> Result<OcrResult, ProviderError>;
}

#[async_trait]
pub trait AutoTaggingProvider: CapabilityProvider {
    async fn generate_tags(&self, expense: &ExpenseRecord) -> Result<TagSet, ProviderError>;

    async fn extract_metadata(
        &self,
        expense: &ExpenseRecord,
    ) -> Result<ExpenseMetadata, ProviderError>;
}
