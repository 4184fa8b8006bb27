//! Deterministic reference providers.
//!
//! These stand in for the trained models so the gateway runs end-to-end.
//! They implement the same contracts a real provider would and make no
//! accuracy claims beyond the figures they report.

mod analytics;
mod categorization;
mod fraud;
mod receipts;
mod tagging;

pub use analytics::MovingAverageAnalytics;
pub use categorization::KeywordCategorizer;
pub use fraud::RuleBasedFraudDetector;
pub use receipts::{PlainTextOcr, TextReceiptValidator};
pub use tagging::KeywordTagger;

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1).
pub(crate) fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / ((xs.len() - 1) as f64);
    var.sqrt()
}

pub(crate) fn haystack(vendor: &str, description: &str) -> String {
    format!("{} {}", vendor, description).to_lowercase()
}

#[cfg(test)]
pub(crate) fn expense(id: &str, vendor: &str, description: &str, amount: f64) -> spendlens_core::ExpenseRecord {
    spendlens_core::ExpenseRecord {
        id: id.to_string(),
        description: description.to_string(),
        amount,
        currency: "USD".to_string(),
        vendor: vendor.to_string(),
        date: chrono::NaiveDate::from_ymd_opt(2026, 3, 11).unwrap(),
        submitter: None,
        category: None,
        history_ref: None,
    }
}
