use std::sync::Arc;

use serde_json::Value as JsonValue;

use spendlens_core::Capability;

use crate::error::ProviderError;
use crate::heuristic;
use crate::provider::{
    AutoTaggingProvider, CategorizationProvider, FraudDetectionProvider, OcrProvider,
    PredictiveAnalyticsProvider, ReceiptValidationProvider,
};

/// The full set of capability providers, constructed once at startup and
/// passed by reference to everything that invokes a capability.
///
/// Cloning is cheap (six `Arc`s).
#[derive(Clone)]
pub struct CapabilitySet {
    pub categorization: Arc<dyn CategorizationProvider>,
    pub fraud: Arc<dyn FraudDetectionProvider>,
    pub analytics: Arc<dyn PredictiveAnalyticsProvider>,
    pub receipts: Arc<dyn ReceiptValidationProvider>,
    pub ocr: Arc<dyn OcrProvider>,
    pub tagging: Arc<dyn AutoTaggingProvider>,
}

impl CapabilitySet {
    /// Deterministic reference providers (no trained models).
    pub fn heuristic() -> Self {
        Self {
            categorization: Arc::new(heuristic::KeywordCategorizer::new()),
            fraud: Arc::new(heuristic::RuleBasedFraudDetector::new()),
            analytics: Arc::new(heuristic::MovingAverageAnalytics::new()),
            receipts: Arc::new(heuristic::TextReceiptValidator::new()),
            ocr: Arc::new(heuristic::PlainTextOcr::new()),
            tagging: Arc::new(heuristic::KeywordTagger::new()),
        }
    }

    pub async fn accuracy_metric(&self, capability: Capability) -> Result<f64, ProviderError> {
        match capability {
            Capability::Categorization => self.categorization.accuracy_metric().await,
            Capability::FraudDetection => self.fraud.accuracy_metric().await,
            Capability::PredictiveAnalytics => self.analytics.accuracy_metric().await,
            Capability::ReceiptValidation => self.receipts.accuracy_metric().await,
            Capability::AutoTagging => self.tagging.accuracy_metric().await,
            Capability::Ocr => self.ocr.accuracy_metric().await,
        }
    }

    pub async fn health(&self, capability: Capability) -> Result<(), ProviderError> {
        match capability {
            Capability::Categorization => self.categorization.health().await,
            Capability::FraudDetection => self.fraud.health().await,
            Capability::PredictiveAnalytics => self.analytics.health().await,
            Capability::ReceiptValidation => self.receipts.health().await,
            Capability::AutoTagging => self.tagging.health().await,
            Capability::Ocr => self.ocr.health().await,
        }
    }

    pub async fn retrain(
        &self,
        capability: Capability,
        examples: Vec<JsonValue>,
    ) -> Result<(), ProviderError> {
        match capability {
            Capability::Categorization => self.categorization.retrain(examples).await,
            Capability::FraudDetection => self.fraud.retrain(examples).await,
            Capability::PredictiveAnalytics => self.analytics.retrain(examples).await,
            Capability::ReceiptValidation => self.receipts.retrain(examples).await,
            Capability::AutoTagging => self.tagging.retrain(examples).await,
            Capability::Ocr => self.ocr.retrain(examples).await,
        }
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySet").finish_non_exhaustive()
    }
}
