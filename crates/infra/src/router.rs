//! Request router.
//!
//! One method per request kind. Each validates its input, resolves the
//! capability operation(s) and runs them through the dispatcher. Nothing is
//! invoked when validation fails.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use spendlens_ai::CapabilitySet;
use spendlens_core::{
    ApprovalEstimate, ApprovalRecord, Capability, CategoryPrediction, CompanyPolicies,
    ExpenseMetadata, ExpenseRecord, FraudAlert, GatewayError, GatewayResult, JobId, OcrResult,
    PredictionResult, RiskLevel, TrendGranularity, TrendReport, ValidationResult,
};

use crate::artifacts::{ArtifactStats, TransientArtifactStore};
use crate::dispatcher::{ConcurrentDispatcher, Operation};
use crate::jobs::{JobRegistryError, JobStats, RetrainingJob, RetrainingJobManager, RetrainingSubmission};

pub const MAX_FORECAST_MONTHS: i64 = 12;

#[derive(Debug, Clone, Copy)]
pub struct RouterLimits {
    pub max_batch_size: usize,
    pub max_upload_bytes: usize,
}

impl Default for RouterLimits {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Outcome for one batch position.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem<T> {
    pub index: usize,
    pub expense_id: String,
    pub outcome: GatewayResult<T>,
}

/// Per-capability error as reported inside a combined response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityErrorView {
    pub capability: Option<Capability>,
    pub error: &'static str,
    pub message: String,
}

impl From<&GatewayError> for CapabilityErrorView {
    fn from(err: &GatewayError) -> Self {
        Self {
            capability: err.capability(),
            error: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub expense_id: String,
    pub risk_score: f64,
    /// From the fraud analysis; absent if that call failed.
    pub risk_level: Option<RiskLevel>,
    pub signals: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoTagResult {
    pub tags: Vec<String>,
    pub metadata: ExpenseMetadata,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeAnalysis {
    pub expense_id: String,
    pub category: Option<CategoryPrediction>,
    pub fraud_alert: Option<FraudAlert>,
    pub errors: Vec<CapabilityErrorView>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPerformance {
    /// `None` where the capability could not report.
    pub metrics: BTreeMap<Capability, Option<f64>>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub capabilities: BTreeMap<Capability, CapabilityHealth>,
    pub jobs: JobStats,
    pub artifacts: ArtifactStats,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.capabilities.values().all(|h| h.healthy)
    }
}

fn registry_error(err: JobRegistryError) -> GatewayError {
    warn!(error = %err, "job registry error");
    GatewayError::job_submission(err.to_string())
}

pub struct RequestRouter {
    capabilities: CapabilitySet,
    dispatcher: ConcurrentDispatcher,
    artifacts: TransientArtifactStore,
    jobs: Arc<RetrainingJobManager>,
    limits: RouterLimits,
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("dispatcher", &self.dispatcher)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RequestRouter {
    pub fn new(
        capabilities: CapabilitySet,
        dispatcher: ConcurrentDispatcher,
        artifacts: TransientArtifactStore,
        jobs: Arc<RetrainingJobManager>,
        limits: RouterLimits,
    ) -> Self {
        Self {
            capabilities,
            dispatcher,
            artifacts,
            jobs,
            limits,
        }
    }

    pub fn jobs(&self) -> &Arc<RetrainingJobManager> {
        &self.jobs
    }

    fn predict_op(&self, expense: ExpenseRecord) -> Operation<CategoryPrediction> {
        let provider = self.capabilities.categorization.clone();
        Operation::new(Capability::Categorization, async move {
            provider.predict(&expense).await
        })
    }

    fn analyze_op(
        &self,
        expense: ExpenseRecord,
        history: Option<Vec<ExpenseRecord>>,
    ) -> Operation<FraudAlert> {
        let provider = self.capabilities.fraud.clone();
        Operation::new(Capability::FraudDetection, async move {
            provider.analyze(&expense, history.as_deref()).await
        })
    }

    fn check_artifact(&self, bytes: &[u8]) -> GatewayResult<()> {
        if bytes.is_empty() {
            return Err(GatewayError::invalid_request("uploaded file is empty"));
        }
        if bytes.len() > self.limits.max_upload_bytes {
            return Err(GatewayError::invalid_request(format!(
                "uploaded file is {} bytes; the limit is {}",
                bytes.len(),
                self.limits.max_upload_bytes
            )));
        }
        Ok(())
    }

    pub async fn categorize(&self, expense: ExpenseRecord) -> GatewayResult<CategoryPrediction> {
        expense.validate()?;
        self.dispatcher.dispatch_one(self.predict_op(expense)).await
    }

    /// One outcome per input, in input order.
    pub async fn batch_categorize(
        &self,
        expenses: Vec<ExpenseRecord>,
    ) -> GatewayResult<Vec<BatchItem<CategoryPrediction>>> {
        if expenses.is_empty() {
            return Err(GatewayError::invalid_request(
                "batch must contain at least one expense",
            ));
        }
        if expenses.len() > self.limits.max_batch_size {
            return Err(GatewayError::invalid_request(format!(
                "batch of {} exceeds the maximum of {}",
                expenses.len(),
                self.limits.max_batch_size
            )));
        }
        for (index, expense) in expenses.iter().enumerate() {
            expense.validate().map_err(|e| match e {
                GatewayError::InvalidRequest(msg) => {
                    GatewayError::invalid_request(format!("item {index}: {msg}"))
                }
                other => other,
            })?;
        }

        let ids: Vec<String> = expenses.iter().map(|e| e.id.clone()).collect();
        let ops = expenses.into_iter().map(|e| self.predict_op(e)).collect();
        let outcomes = self.dispatcher.dispatch(ops).await;
        debug!(items = ids.len(), "batch categorized");

        Ok(ids
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (expense_id, outcome))| BatchItem {
                index,
                expense_id,
                outcome,
            })
            .collect())
    }

    pub async fn detect_fraud(
        &self,
        expense: ExpenseRecord,
        history: Option<Vec<ExpenseRecord>>,
    ) -> GatewayResult<FraudAlert> {
        expense.validate()?;
        for past in history.iter().flatten() {
            past.validate()?;
        }
        self.dispatcher
            .dispatch_one(self.analyze_op(expense, history))
            .await
    }

    /// Policy score and fraud analysis side by side. The score is required;
    /// the analysis only enriches the result.
    pub async fn assess_risk(
        &self,
        expense: ExpenseRecord,
        policies: CompanyPolicies,
    ) -> GatewayResult<RiskAssessment> {
        expense.validate()?;
        let provider = self.capabilities.fraud.clone();
        let scored = expense.clone();
        let score_op = Operation::new(Capability::FraudDetection, async move {
            provider.risk_score(&scored, &policies).await
        });
        let expense_id = expense.id.clone();

        let (score, alert) = self
            .dispatcher
            .dispatch_pair(score_op, self.analyze_op(expense, None))
            .await;
        let risk_score = score?;
        let (risk_level, signals) = match alert {
            Ok(alert) => (Some(alert.risk_level), alert.signals),
            Err(e) => {
                debug!(expense_id = %expense_id, error = %e, "risk assessment without fraud analysis");
                (None, BTreeSet::new())
            }
        };

        Ok(RiskAssessment {
            expense_id,
            risk_score,
            risk_level,
            signals,
            timestamp: Utc::now(),
        })
    }

    pub async fn forecast_budget(
        &self,
        history: Vec<ExpenseRecord>,
        months: i64,
    ) -> GatewayResult<PredictionResult> {
        if !(1..=MAX_FORECAST_MONTHS).contains(&months) {
            return Err(GatewayError::invalid_request(format!(
                "prediction_months must be between 1 and {MAX_FORECAST_MONTHS} (got {months})"
            )));
        }
        if history.is_empty() {
            return Err(GatewayError::invalid_request(
                "historical_data must contain at least one expense",
            ));
        }
        for expense in &history {
            expense.validate()?;
        }

        let horizon = months as u8;
        let provider = self.capabilities.analytics.clone();
        self.dispatcher
            .dispatch_one(Operation::new(Capability::PredictiveAnalytics, async move {
                provider.forecast_budget(&history, horizon).await
            }))
            .await
    }

    pub async fn analyze_trends(
        &self,
        expenses: Vec<ExpenseRecord>,
        analysis_type: &str,
    ) -> GatewayResult<TrendReport> {
        let granularity: TrendGranularity = analysis_type.parse()?;
        if expenses.is_empty() {
            return Err(GatewayError::invalid_request(
                "expenses must contain at least one expense",
            ));
        }
        for expense in &expenses {
            expense.validate()?;
        }

        let provider = self.capabilities.analytics.clone();
        self.dispatcher
            .dispatch_one(Operation::new(Capability::PredictiveAnalytics, async move {
                provider.analyze_trends(&expenses, granularity).await
            }))
            .await
    }

    pub async fn predict_approval_time(
        &self,
        expense: ExpenseRecord,
        approval_history: Vec<ApprovalRecord>,
    ) -> GatewayResult<ApprovalEstimate> {
        expense.validate()?;
        let provider = self.capabilities.analytics.clone();
        self.dispatcher
            .dispatch_one(Operation::new(Capability::PredictiveAnalytics, async move {
                provider
                    .predict_approval_time(&expense, &approval_history)
                    .await
            }))
            .await
    }

    pub async fn validate_receipt(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> GatewayResult<ValidationResult> {
        self.check_artifact(bytes)?;
        let provider = self.capabilities.receipts.clone();
        let dispatcher = &self.dispatcher;
        self.artifacts
            .scoped(bytes, file_name, |artifact| async move {
                dispatcher
                    .dispatch_one(Operation::new(Capability::ReceiptValidation, async move {
                        provider.validate(&artifact).await
                    }))
                    .await
            })
            .await
    }

    pub async fn enhanced_ocr(
        &self,
        bytes: &[u8],
        file_name: &str,
        enhance: bool,
    ) -> GatewayResult<OcrResult> {
        self.check_artifact(bytes)?;
        let provider = self.capabilities.ocr.clone();
        let dispatcher = &self.dispatcher;
        self.artifacts
            .scoped(bytes, file_name, |artifact| async move {
                dispatcher
                    .dispatch_one(Operation::new(Capability::Ocr, async move {
                        provider.process(&artifact, enhance).await
                    }))
                    .await
            })
            .await
    }

    pub async fn auto_tag(&self, expense: ExpenseRecord) -> GatewayResult<AutoTagResult> {
        expense.validate()?;
        let tagger = self.capabilities.tagging.clone();
        let extractor = self.capabilities.tagging.clone();
        let for_metadata = expense.clone();

        let (tags, metadata) = self
            .dispatcher
            .dispatch_pair(
                Operation::new(Capability::AutoTagging, async move {
                    tagger.generate_tags(&expense).await
                }),
                Operation::new(Capability::AutoTagging, async move {
                    extractor.extract_metadata(&for_metadata).await
                }),
            )
            .await;
        let tags = tags?;
        Ok(AutoTagResult {
            tags: tags.tags,
            metadata: metadata?,
            confidence: tags.confidence,
            timestamp: Utc::now(),
        })
    }

    /// Categorization and fraud analysis for one expense; each half may fail
    /// on its own.
    pub async fn realtime_analysis(&self, expense: ExpenseRecord) -> GatewayResult<RealtimeAnalysis> {
        expense.validate()?;
        let expense_id = expense.id.clone();
        let (category, fraud) = self
            .dispatcher
            .dispatch_pair(self.predict_op(expense.clone()), self.analyze_op(expense, None))
            .await;

        let mut errors = Vec::new();
        let category = category.map_err(|e| errors.push(CapabilityErrorView::from(&e))).ok();
        let fraud_alert = fraud.map_err(|e| errors.push(CapabilityErrorView::from(&e))).ok();

        Ok(RealtimeAnalysis {
            expense_id,
            category,
            fraud_alert,
            errors,
            timestamp: Utc::now(),
        })
    }

    pub async fn model_performance(&self) -> ModelPerformance {
        let ops = Capability::ALL
            .into_iter()
            .map(|capability| {
                let caps = self.capabilities.clone();
                Operation::new(capability, async move { caps.accuracy_metric(capability).await })
            })
            .collect();
        let results = self.dispatcher.dispatch(ops).await;

        ModelPerformance {
            metrics: Capability::ALL
                .into_iter()
                .zip(results)
                .map(|(capability, result)| (capability, result.ok()))
                .collect(),
            last_updated: Utc::now(),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let ops = Capability::ALL
            .into_iter()
            .map(|capability| {
                let caps = self.capabilities.clone();
                Operation::new(capability, async move { caps.health(capability).await })
            })
            .collect();
        let results = self.dispatcher.dispatch(ops).await;

        let capabilities = Capability::ALL
            .into_iter()
            .zip(results)
            .map(|(capability, result)| {
                let health = CapabilityHealth {
                    healthy: result.is_ok(),
                    error: result.err().map(|e| e.code().to_string()),
                };
                (capability, health)
            })
            .collect();

        let jobs = self.jobs.stats().unwrap_or_else(|e| {
            warn!(error = %e, "job stats unavailable");
            JobStats::default()
        });
        HealthReport {
            capabilities,
            jobs,
            artifacts: self.artifacts.stats(),
        }
    }

    /// Enqueue only; training runs in the background.
    pub fn submit_retraining(&self, payload: &JsonValue) -> GatewayResult<RetrainingSubmission> {
        self.jobs.submit(payload)
    }

    pub fn retraining_status(&self, job_id: JobId) -> GatewayResult<Option<RetrainingJob>> {
        self.jobs.job(job_id).map_err(registry_error)
    }

    pub fn list_retraining(&self, limit: usize) -> GatewayResult<Vec<RetrainingJob>> {
        self.jobs.jobs(limit).map_err(registry_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobRegistry, RetrainingConfig};
    use chrono::NaiveDate;
    use spendlens_ai::fixtures::Script;
    use std::time::Duration;

    struct Harness {
        router: RequestRouter,
        script: Arc<Script>,
        dir: tempfile::TempDir,
    }

    fn harness_with(script: Arc<Script>, timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let caps = script.capability_set();
        let jobs = RetrainingJobManager::start(
            caps.clone(),
            Arc::new(InMemoryJobRegistry::new()),
            RetrainingConfig::default(),
        );
        let router = RequestRouter::new(
            caps,
            ConcurrentDispatcher::new(timeout),
            TransientArtifactStore::new(dir.path()),
            jobs,
            RouterLimits {
                max_batch_size: 5,
                max_upload_bytes: 64,
            },
        );
        Harness {
            router,
            script,
            dir,
        }
    }

    fn harness() -> Harness {
        harness_with(Script::new(), Duration::from_secs(1))
    }

    fn expense(id: &str) -> ExpenseRecord {
        ExpenseRecord {
            id: id.to_string(),
            description: "team lunch".to_string(),
            amount: 42.0,
            currency: "USD".to_string(),
            vendor: "Corner Bistro".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 11).unwrap(),
            submitter: Some("u-1".to_string()),
            category: None,
            history_ref: None,
        }
    }

    #[tokio::test]
    async fn batch_outcomes_follow_input_order() {
        let script = Script::new();
        script.slow("e2", Duration::from_secs(5));
        let h = harness_with(script, Duration::from_millis(100));

        let items = h
            .router
            .batch_categorize(vec![expense("e1"), expense("e2"), expense("e3")])
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(
            items.iter().map(|i| i.expense_id.as_str()).collect::<Vec<_>>(),
            vec!["e1", "e2", "e3"]
        );
        assert!(items[0].outcome.is_ok());
        assert_eq!(items[1].outcome.as_ref().unwrap_err().code(), "capability_timeout");
        assert!(items[2].outcome.is_ok());
    }

    #[tokio::test]
    async fn batch_limits_are_enforced_before_dispatch() {
        let h = harness();
        assert_eq!(
            h.router.batch_categorize(vec![]).await.unwrap_err().code(),
            "invalid_request"
        );
        let too_many = (0..6).map(|i| expense(&format!("e{i}"))).collect();
        assert!(h.router.batch_categorize(too_many).await.is_err());

        let mut bad = expense("e2");
        bad.amount = f64::NAN;
        let err = h
            .router
            .batch_categorize(vec![expense("e1"), bad])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("item 1"));
        assert_eq!(h.script.calls(), 0);
    }

    #[tokio::test]
    async fn forecast_horizon_is_bounded() {
        let h = harness();
        for months in [0, 13, -1] {
            let err = h
                .router
                .forecast_budget(vec![expense("e1")], months)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_request");
        }
        assert_eq!(h.script.calls(), 0);

        for months in [1, 12] {
            let result = h
                .router
                .forecast_budget(vec![expense("e1")], months)
                .await
                .unwrap();
            assert_eq!(i64::from(result.horizon_months), months);
        }
    }

    #[tokio::test]
    async fn trends_reject_unknown_granularity() {
        let h = harness();
        let err = h
            .router
            .analyze_trends(vec![expense("e1")], "yearly")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        let report = h
            .router
            .analyze_trends(vec![expense("e1")], "weekly")
            .await
            .unwrap();
        assert_eq!(report.granularity, TrendGranularity::Weekly);
    }

    #[tokio::test]
    async fn risk_assessment_tolerates_missing_alert_only() {
        let h = harness();
        let assessment = h
            .router
            .assess_risk(expense("e1"), CompanyPolicies::new())
            .await
            .unwrap();
        assert_eq!(assessment.risk_score, 0.42);
        assert_eq!(assessment.risk_level, Some(RiskLevel::Low));

        h.script.fail_capability(Capability::FraudDetection);
        let err = h
            .router
            .assess_risk(expense("e1"), CompanyPolicies::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "capability_failure");
    }

    #[tokio::test]
    async fn realtime_reports_each_half_independently() {
        let h = harness();
        h.script.fail_capability(Capability::FraudDetection);
        let analysis = h.router.realtime_analysis(expense("e1")).await.unwrap();
        assert!(analysis.category.is_some());
        assert!(analysis.fraud_alert.is_none());
        assert_eq!(analysis.errors.len(), 1);
        assert_eq!(analysis.errors[0].capability, Some(Capability::FraudDetection));
    }

    #[tokio::test]
    async fn receipt_artifact_is_released_on_success_and_failure() {
        let h = harness();
        h.router
            .validate_receipt(b"Total: 10.00", "r.txt")
            .await
            .unwrap();

        h.script.fail_artifacts();
        let err = h
            .router
            .enhanced_ocr(b"Total: 10.00", "r.txt", true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "capability_failure");

        let seen = h.script.artifacts_seen();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, existed)| *existed));
        assert!(seen.iter().all(|(path, _)| !path.exists()));
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
        let stats = h.router.health().await.artifacts;
        assert_eq!((stats.acquired, stats.released), (2, 2));
    }

    #[tokio::test]
    async fn oversized_or_empty_upload_is_rejected() {
        let h = harness();
        assert!(h.router.validate_receipt(b"", "r.txt").await.is_err());
        assert!(h.router.validate_receipt(&[b'x'; 65], "r.txt").await.is_err());
        assert_eq!(h.script.calls(), 0);
    }

    #[tokio::test]
    async fn model_performance_reports_null_for_failures() {
        let h = harness();
        h.script.fail_capability(Capability::Ocr);
        let perf = h.router.model_performance().await;
        assert_eq!(perf.metrics.len(), 6);
        assert_eq!(perf.metrics[&Capability::Ocr], None);
        assert_eq!(perf.metrics[&Capability::Categorization], Some(0.9));

        let health = h.router.health().await;
        assert!(!health.all_healthy());
        assert!(!health.capabilities[&Capability::Ocr].healthy);
    }

    #[tokio::test]
    async fn auto_tag_combines_tags_and_metadata() {
        let h = harness();
        let result = h.router.auto_tag(expense("e1")).await.unwrap();
        assert_eq!(result.tags, vec!["scripted"]);
        assert_eq!(result.metadata["expense_id"], "e1");
    }

    #[tokio::test]
    async fn retraining_goes_through_the_job_manager() {
        let h = harness();
        let submission = h
            .router
            .submit_retraining(&serde_json::json!({"categorization": [{}]}))
            .unwrap();
        let job = h.router.retraining_status(submission.job.id).unwrap();
        assert!(job.is_some());
        assert_eq!(h.router.list_retraining(10).unwrap().len(), 1);
        assert!(h.router.retraining_status(JobId::new()).unwrap().is_none());
    }
}
