//! Capability names.

use serde::{Deserialize, Serialize};

/// One AI/ML capability behind the gateway.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Categorization,
    FraudDetection,
    PredictiveAnalytics,
    ReceiptValidation,
    AutoTagging,
    Ocr,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Categorization,
        Capability::FraudDetection,
        Capability::PredictiveAnalytics,
        Capability::ReceiptValidation,
        Capability::AutoTagging,
        Capability::Ocr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Categorization => "categorization",
            Capability::FraudDetection => "fraud_detection",
            Capability::PredictiveAnalytics => "predictive_analytics",
            Capability::ReceiptValidation => "receipt_validation",
            Capability::AutoTagging => "auto_tagging",
            Capability::Ocr => "ocr",
        }
    }

    /// Resolve a retraining payload key.
    ///
    /// Accepts the canonical names plus `predictions`, the historical key for
    /// predictive analytics training data. Unknown keys resolve to `None`.
    pub fn from_training_key(key: &str) -> Option<Self> {
        match key {
            "predictions" => Some(Capability::PredictiveAnalytics),
            other => Capability::ALL.into_iter().find(|c| c.as_str() == other),
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
