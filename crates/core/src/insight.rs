//! Capability outputs for expense analysis.
//!
//! These are produced by capability providers and passed through the gateway
//! unchanged; nothing here is mutated after construction.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub expense_id: String,
    pub predicted_category: String,
    /// Confidence per candidate category, values in \[0, 1\].
    pub confidence: BTreeMap<String, f64>,
    pub model_version: String,
}

impl CategoryPrediction {
    /// Confidence of the predicted category.
    pub fn top_confidence(&self) -> f64 {
        self.confidence
            .get(&self.predicted_category)
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Bucket a score in \[0, 1\].
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.75 => RiskLevel::High,
            s if s >= 0.5 => RiskLevel::Medium,
            s if s >= 0.25 => RiskLevel::Low,
            _ => RiskLevel::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    pub expense_id: String,
    pub risk_level: RiskLevel,
    /// Names of the rules/models that contributed to the score.
    pub signals: BTreeSet<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyProjection {
    /// First day of the projected month.
    pub month: NaiveDate,
    pub per_category: BTreeMap<String, f64>,
    pub total: f64,
}

/// Budget forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub horizon_months: u8,
    pub months: Vec<MonthlyProjection>,
    pub confidence_interval: ConfidenceInterval,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendGranularity {
    Weekly,
    Monthly,
    Quarterly,
}

impl TrendGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendGranularity::Weekly => "weekly",
            TrendGranularity::Monthly => "monthly",
            TrendGranularity::Quarterly => "quarterly",
        }
    }
}

impl FromStr for TrendGranularity {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(TrendGranularity::Weekly),
            "monthly" => Ok(TrendGranularity::Monthly),
            "quarterly" => Ok(TrendGranularity::Quarterly),
            other => Err(GatewayError::invalid_request(format!(
                "analysis_type must be one of weekly, monthly, quarterly (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPeriod {
    pub period_start: NaiveDate,
    pub total: f64,
    pub per_category: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub granularity: TrendGranularity,
    pub periods: Vec<TrendPeriod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEstimate {
    pub estimated_hours: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSet {
    pub tags: Vec<String>,
    pub confidence: f64,
}

/// Free-form metadata extracted by auto-tagging (project, purpose, location...).
pub type ExpenseMetadata = Map<String, JsonValue>;

/// Company expense policies, as supplied by the caller. Shape is provider-defined.
pub type CompanyPolicies = Map<String, JsonValue>;

/// One historical approval record. Shape is provider-defined.
pub type ApprovalRecord = Map<String, JsonValue>;
