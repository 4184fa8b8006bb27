//! Expense records submitted for analysis.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

fn default_currency() -> String {
    "USD".to_string()
}

/// An expense as submitted by the expense-management product.
///
/// Immutable once handed to an analysis call. Within a batch, identity is the
/// submission position, not `id` (clients may send duplicates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: String,
    pub description: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub vendor: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub submitter: Option<String>,
    /// Category previously assigned by a human, if any.
    #[serde(default)]
    pub category: Option<String>,
    /// Opaque reference to the submitter's expense history.
    #[serde(default)]
    pub history_ref: Option<String>,
}

impl ExpenseRecord {
    /// Structural checks shared by every analysis entrypoint.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::invalid_request("expense id must not be empty"));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(GatewayError::invalid_request(format!(
                "expense {}: amount must be a finite non-negative number",
                self.id
            )));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GatewayError::invalid_request(format!(
                "expense {}: currency must be a 3-letter code",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample(id: &str, amount: f64) -> ExpenseRecord {
    ExpenseRecord {
        id: id.to_string(),
        description: "Team lunch".to_string(),
        amount,
        currency: "USD".to_string(),
        vendor: "Corner Bistro".to_string(),
        date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        submitter: Some("u-1".to_string()),
        category: None,
        history_ref: None,
    }
}
