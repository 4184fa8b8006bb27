use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Datelike, Weekday};
use serde_json::Value as JsonValue;

use spendlens_core::{CompanyPolicies, ExpenseRecord, FraudAlert, RiskLevel};

use super::{mean, stddev_sample};
use crate::error::ProviderError;
use crate::provider::{CapabilityProvider, FraudDetectionProvider};

const DEFAULT_MAX_AMOUNT: f64 = 5_000.0;

/// Rule set scored additively and clamped to \[0, 1\].
///
/// Amount anomaly uses a z-score of the expense amount against the
/// submitter's history (needs at least 3 historical amounts).
#[derive(Debug)]
pub struct RuleBasedFraudDetector {
    z_threshold: RwLock<f64>,
}

impl RuleBasedFraudDetector {
    pub fn new() -> Self {
        Self {
            z_threshold: RwLock::new(3.0),
        }
    }

    fn signals(&self, expense: &ExpenseRecord, history: &[ExpenseRecord]) -> Vec<(&'static str, f64)> {
        let mut signals = Vec::new();

        if expense.amount >= 100.0 && expense.amount % 100.0 == 0.0 {
            signals.push(("round_amount", 0.15));
        }
        if matches!(expense.date.weekday(), Weekday::Sat | Weekday::Sun) {
            signals.push(("weekend_submission", 0.1));
        }
        if expense.amount > DEFAULT_MAX_AMOUNT {
            signals.push(("high_amount", 0.3));
        }

        let duplicate = history.iter().any(|h| {
            h.id != expense.id
                && h.vendor.eq_ignore_ascii_case(&expense.vendor)
                && h.date == expense.date
                && (h.amount - expense.amount).abs() < 0.005
        });
        if duplicate {
            signals.push(("duplicate_expense", 0.5));
        }

        let amounts: Vec<f64> = history.iter().map(|h| h.amount).collect();
        if amounts.len() >= 3 {
            let m = mean(&amounts);
            let sd = stddev_sample(&amounts, m);
            let threshold = *self.z_threshold.read().unwrap();
            if sd > f64::EPSILON && ((expense.amount - m) / sd).abs() >= threshold {
                signals.push(("amount_anomaly", 0.4));
            }
        }

        signals
    }
}

impl Default for RuleBasedFraudDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProvider for RuleBasedFraudDetector {
    async fn accuracy_metric(&self) -> Result<f64, ProviderError> {
        Ok(0.81)
    }

    /// Examples are `{"amount": f64, "fraudulent": bool}`; the anomaly
    /// threshold is tightened toward the smallest fraudulent z-score seen.
    async fn retrain(&self, examples: Vec<JsonValue>) -> Result<(), ProviderError> {
        let mut legit = Vec::new();
        let mut fraud = Vec::new();
        for example in &examples {
            let amount = example
                .get("amount")
                .and_then(JsonValue::as_f64)
                .ok_or_else(|| ProviderError::invalid_input("fraud example missing amount"))?;
            match example.get("fraudulent").and_then(JsonValue::as_bool) {
                Some(true) => fraud.push(amount),
                Some(false) => legit.push(amount),
                None => return Err(ProviderError::invalid_input("fraud example missing label")),
            }
        }

        let m = mean(&legit);
        let sd = stddev_sample(&legit, m);
        if sd <= f64::EPSILON || fraud.is_empty() {
            return Ok(());
        }
        let min_z = fraud
            .iter()
            .map(|a| ((a - m) / sd).abs())
            .fold(f64::INFINITY, f64::min);
        *self.z_threshold.write().unwrap() = min_z.clamp(2.0, 4.0);
        Ok(())
    }
}

#[async_trait]
impl FraudDetectionProvider for RuleBasedFraudDetector {
    async fn analyze(
        &self,
        expense: &ExpenseRecord,
        history: Option<&[ExpenseRecord]>,
    ) -> Result<FraudAlert, ProviderError> {
        let signals = self.signals(expense, history.unwrap_or(&[]));
        let score = signals.iter().map(|(_, w)| w).sum::<f64>().min(1.0);
        Ok(FraudAlert {
            expense_id: expense.id.clone(),
            risk_level: RiskLevel::from_score(score),
            signals: signals.into_iter().map(|(s, _)| s.to_string()).collect::<BTreeSet<_>>(),
            score,
        })
    }

    /// Recognised policy keys: `max_amount` (number), `blocked_vendors`
    /// (array of strings), `weekend_allowed` (bool).
    async fn risk_score(
        &self,
        expense: &ExpenseRecord,
        policies: &CompanyPolicies,
    ) -> Result<f64, ProviderError> {
        let max_amount = policies
            .get("max_amount")
            .and_then(JsonValue::as_f64)
            .unwrap_or(DEFAULT_MAX_AMOUNT);
        if max_amount <= 0.0 {
            return Err(ProviderError::invalid_input("max_amount must be positive"));
        }

        let mut score = (expense.amount / max_amount).min(1.0) * 0.5;

        let blocked = policies
            .get("blocked_vendors")
            .and_then(JsonValue::as_array)
            .is_some_and(|vendors| {
                vendors
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .any(|v| v.eq_ignore_ascii_case(&expense.vendor))
            });
        if blocked {
            score += 0.5;
        }

        let weekend_allowed = policies
            .get("weekend_allowed")
            .and_then(JsonValue::as_bool)
            .unwrap_or(true);
        if !weekend_allowed && matches!(expense.date.weekday(), Weekday::Sat | Weekday::Sun) {
            score += 0.2;
        }

        Ok(score.min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristic::expense;

    #[tokio::test]
    async fn clean_expense_has_no_risk() {
        let detector = RuleBasedFraudDetector::new();
        // 2026-03-11 is a Wednesday.
        let alert = detector
            .analyze(&expense("e1", "Cafe", "coffee", 12.4), None)
            .await
            .unwrap();
        assert_eq!(alert.risk_level, RiskLevel::None);
        assert!(alert.signals.is_empty());
    }

    #[tokio::test]
    async fn duplicate_and_anomaly_signals() {
        let detector = RuleBasedFraudDetector::new();
        let mut history: Vec<_> = (0..5)
            .map(|i| expense(&format!("h{i}"), "Cafe", "coffee", 10.0 + i as f64))
            .collect();
        history.push(expense("h-dup", "Cafe", "coffee", 900.0));

        let alert = detector
            .analyze(&expense("e1", "cafe", "coffee", 900.0), Some(&history))
            .await
            .unwrap();
        assert!(alert.signals.contains("duplicate_expense"));
        assert!(alert.score >= 0.5);
        assert!(alert.risk_level >= RiskLevel::Medium);
    }

    #[tokio::test]
    async fn blocked_vendor_raises_policy_score() {
        let detector = RuleBasedFraudDetector::new();
        let policies: CompanyPolicies = serde_json::from_value(serde_json::json!({
            "max_amount": 1000.0,
            "blocked_vendors": ["Casino Royale"],
        }))
        .unwrap();

        let score = detector
            .risk_score(&expense("e1", "Casino Royale", "chips", 500.0), &policies)
            .await
            .unwrap();
        assert!((score - 0.75).abs() < 1e-9);
    }
}
