//! Scripted capability providers for tests.
//!
//! One shared [`Script`] drives all six providers: tests mark expense ids as
//! slow or failing, mark capabilities whose retraining fails, and read back
//! what the providers observed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use spendlens_core::{
    ApprovalEstimate, ApprovalRecord, ArtifactRef, Capability, CategoryPrediction,
    CompanyPolicies, ConfidenceInterval, ExpenseMetadata, ExpenseRecord, FraudAlert, OcrResult,
    PredictionResult, ReceiptFields, RiskLevel, TagSet, TrendGranularity, TrendReport,
    ValidationResult,
};

use crate::error::ProviderError;
use crate::provider::{
    AutoTaggingProvider, CapabilityProvider, CategorizationProvider, FraudDetectionProvider,
    OcrProvider, PredictiveAnalyticsProvider, ReceiptValidationProvider,
};
use crate::registry::CapabilitySet;

#[derive(Debug, Default)]
pub struct Script {
    slow: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
    failing_capabilities: Mutex<HashSet<Capability>>,
    failing_retrains: Mutex<HashSet<Capability>>,
    retrain_delay: Mutex<Duration>,
    retrain_delays: Mutex<HashMap<Capability, Duration>>,
    fail_artifacts: AtomicBool,
    calls: AtomicUsize,
    retrain_running: Mutex<HashMap<Capability, usize>>,
    retrain_peak: Mutex<HashMap<Capability, usize>>,
    retrains: Mutex<Vec<(Capability, usize)>>,
    artifacts_seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a provider set backed by this script.
    pub fn capability_set(self: &Arc<Self>) -> CapabilitySet {
        let p = |capability| Arc::new(ScriptedProvider { script: self.clone(), capability });
        CapabilitySet {
            categorization: p(Capability::Categorization),
            fraud: p(Capability::FraudDetection),
            analytics: p(Capability::PredictiveAnalytics),
            receipts: p(Capability::ReceiptValidation),
            ocr: p(Capability::Ocr),
            tagging: p(Capability::AutoTagging),
        }
    }

    /// Delay every operation on this expense id.
    pub fn slow(&self, expense_id: &str, delay: Duration) -> &Self {
        self.slow.lock().unwrap().insert(expense_id.to_string(), delay);
        self
    }

    /// Fail every operation on this expense id.
    pub fn fail(&self, expense_id: &str) -> &Self {
        self.failing.lock().unwrap().insert(expense_id.to_string());
        self
    }

    /// Fail every expense operation of one capability.
    pub fn fail_capability(&self, capability: Capability) -> &Self {
        self.failing_capabilities.lock().unwrap().insert(capability);
        self
    }

    pub fn fail_retrain(&self, capability: Capability) -> &Self {
        self.failing_retrains.lock().unwrap().insert(capability);
        self
    }

    pub fn retrain_delay(&self, delay: Duration) -> &Self {
        *self.retrain_delay.lock().unwrap() = delay;
        self
    }

    /// Retrain delay for one capability, overriding `retrain_delay`.
    pub fn slow_retrain(&self, capability: Capability, delay: Duration) -> &Self {
        self.retrain_delays.lock().unwrap().insert(capability, delay);
        self
    }

    pub fn fail_artifacts(&self) -> &Self {
        self.fail_artifacts.store(true, Ordering::SeqCst);
        self
    }

    /// Number of expense/artifact operations invoked so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running retrains seen per capability.
    pub fn retrain_peak(&self, capability: Capability) -> usize {
        self.retrain_peak
            .lock()
            .unwrap()
            .get(&capability)
            .copied()
            .unwrap_or(0)
    }

    /// Completed retrain calls in completion order: (capability, example count).
    pub fn retrains(&self) -> Vec<(Capability, usize)> {
        self.retrains.lock().unwrap().clone()
    }

    /// Artifact paths handed to providers and whether the file existed then.
    pub fn artifacts_seen(&self) -> Vec<(PathBuf, bool)> {
        self.artifacts_seen.lock().unwrap().clone()
    }

    async fn expense_call(&self, capability: Capability, expense_id: &str) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.slow.lock().unwrap().get(expense_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(expense_id)
            || self.failing_capabilities.lock().unwrap().contains(&capability)
        {
            return Err(ProviderError::inference(format!("scripted failure for {expense_id}")));
        }
        Ok(())
    }

    fn artifact_call(&self, artifact: &ArtifactRef) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.artifacts_seen
            .lock()
            .unwrap()
            .push((artifact.path.clone(), artifact.path.exists()));
        if self.fail_artifacts.load(Ordering::SeqCst) {
            return Err(ProviderError::inference("scripted artifact failure"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ScriptedProvider {
    script: Arc<Script>,
    capability: Capability,
}

#[async_trait]
impl CapabilityProvider for ScriptedProvider {
    async fn accuracy_metric(&self) -> Result<f64, ProviderError> {
        if self.script.failing_capabilities.lock().unwrap().contains(&self.capability) {
            return Err(ProviderError::inference("scripted metric failure"));
        }
        Ok(0.9)
    }

    async fn health(&self) -> Result<(), ProviderError> {
        if self.script.failing_capabilities.lock().unwrap().contains(&self.capability) {
            return Err(ProviderError::Internal("scripted outage".to_string()));
        }
        Ok(())
    }

    async fn retrain(&self, examples: Vec<JsonValue>) -> Result<(), ProviderError> {
        {
            let mut running = self.script.retrain_running.lock().unwrap();
            let now = running.entry(self.capability).or_insert(0);
            *now += 1;
            let mut peak = self.script.retrain_peak.lock().unwrap();
            let p = peak.entry(self.capability).or_insert(0);
            *p = (*p).max(*now);
        }

        let delay = self
            .script
            .retrain_delays
            .lock()
            .unwrap()
            .get(&self.capability)
            .copied()
            .unwrap_or_else(|| *self.script.retrain_delay.lock().unwrap());
        tokio::time::sleep(delay).await;

        *self
            .script
            .retrain_running
            .lock()
            .unwrap()
            .entry(self.capability)
            .or_insert(1) -= 1;
        self.script
            .retrains
            .lock()
            .unwrap()
            .push((self.capability, examples.len()));

        if self.script.failing_retrains.lock().unwrap().contains(&self.capability) {
            return Err(ProviderError::inference("scripted retrain failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl CategorizationProvider for ScriptedProvider {
    async fn predict(&self, expense: &ExpenseRecord) -> Result<CategoryPrediction, ProviderError> {
        self.script.expense_call(self.capability, &expense.id).await?;
        Ok(CategoryPrediction {
            expense_id: expense.id.clone(),
            predicted_category: "meals".to_string(),
            confidence: BTreeMap::from([("meals".to_string(), 1.0)]),
            model_version: "scripted".to_string(),
        })
    }
}

#[async_trait]
impl FraudDetectionProvider for ScriptedProvider {
    async fn analyze(
        &self,
        expense: &ExpenseRecord,
        history: Option<&[ExpenseRecord]>,
    ) -> Result<FraudAlert, ProviderError> {
        self.script.expense_call(self.capability, &expense.id).await?;
        let mut signals = BTreeSet::new();
        if history.is_some_and(|h| !h.is_empty()) {
            signals.insert("history_checked".to_string());
        }
        Ok(FraudAlert {
            expense_id: expense.id.clone(),
            risk_level: RiskLevel::Low,
            signals,
            score: 0.3,
        })
    }

    async fn risk_score(
        &self,
        expense: &ExpenseRecord,
        _policies: &CompanyPolicies,
    ) -> Result<f64, ProviderError> {
        self.script.expense_call(self.capability, &expense.id).await?;
        Ok(0.42)
    }
}

#[async_trait]
impl PredictiveAnalyticsProvider for ScriptedProvider {
    async fn forecast_budget(
        &self,
        history: &[ExpenseRecord],
        horizon_months: u8,
    ) -> Result<PredictionResult, ProviderError> {
        if let Some(first) = history.first() {
            self.script.expense_call(self.capability, &first.id).await?;
        }
        Ok(PredictionResult {
            horizon_months,
            months: Vec::new(),
            confidence_interval: ConfidenceInterval {
                lower: 0.0,
                upper: 0.0,
                level: 0.95,
            },
        })
    }

    async fn analyze_trends(
        &self,
        expenses: &[ExpenseRecord],
        granularity: TrendGranularity,
    ) -> Result<TrendReport, ProviderError> {
        if let Some(first) = expenses.first() {
            self.script.expense_call(self.capability, &first.id).await?;
        }
        Ok(TrendReport {
            granularity,
            periods: Vec::new(),
        })
    }

    async fn predict_approval_time(
        &self,
        expense: &ExpenseRecord,
        _approval_history: &[ApprovalRecord],
    ) -> Result<ApprovalEstimate, ProviderError> {
        self.script.expense_call(self.capability, &expense.id).await?;
        Ok(ApprovalEstimate {
            estimated_hours: 6.0,
            confidence: 0.85,
        })
    }
}

#[async_trait]
impl ReceiptValidationProvider for ScriptedProvider {
    async fn validate(&self, artifact: &ArtifactRef) -> Result<ValidationResult, ProviderError> {
        self.script.artifact_call(artifact)?;
        Ok(ValidationResult {
            source_artifact_id: artifact.id,
            extracted_fields: ReceiptFields::default(),
            confidence_per_field: BTreeMap::new(),
            authenticity_verdict: None,
        })
    }
}

#[async_trait]
impl OcrProvider for ScriptedProvider {
    async fn process(&self, artifact: &ArtifactRef, enhance: bool) -> Result<OcrResult, ProviderError> {
        self.script.artifact_call(artifact)?;
        Ok(OcrResult {
            source_artifact_id: artifact.id,
            extracted_fields: ReceiptFields::default(),
            confidence_per_field: BTreeMap::new(),
            raw_text: String::new(),
            enhanced: enhance,
        })
    }
}

#[async_trait]
impl AutoTaggingProvider for ScriptedProvider {
    async fn generate_tags(&self, expense: &ExpenseRecord) -> Result<TagSet, ProviderError> {
        self.script.expense_call(self.capability, &expense.id).await?;
        Ok(TagSet {
            tags: vec!["scripted".to_string()],
            confidence: 0.9,
        })
    }

    async fn extract_metadata(&self, expense: &ExpenseRecord) -> Result<ExpenseMetadata, ProviderError> {
        self.script.expense_call(self.capability, &expense.id).await?;
        let mut metadata = ExpenseMetadata::new();
        metadata.insert("expense_id".to_string(), JsonValue::String(expense.id.clone()));
        Ok(metadata)
    }
}
