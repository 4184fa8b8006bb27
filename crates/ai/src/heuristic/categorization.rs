use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use spendlens_core::{CategoryPrediction, ExpenseRecord};

use super::haystack;
use crate::error::ProviderError;
use crate::provider::{CapabilityProvider, CategorizationProvider};

const FALLBACK_CATEGORY: &str = "other";

const KEYWORDS: &[(&str, &[&str])] = &[
    ("meals", &["restaurant", "bistro", "cafe", "coffee", "lunch", "dinner", "pizza", "catering"]),
    ("travel", &["airline", "flight", "hotel", "taxi", "uber", "lyft", "train", "rental car"]),
    ("software", &["saas", "subscription", "license", "github", "aws", "cloud", "jetbrains"]),
    ("office_supplies", &["staples", "paper", "printer", "toner", "stationery", "office depot"]),
    ("utilities", &["electric", "water", "internet", "phone", "telecom"]),
    ("training", &["course", "conference", "workshop", "udemy", "seminar"]),
];

#[derive(Debug, Deserialize)]
struct LabelledVendor {
    vendor: String,
    category: String,
}

/// Vendor/description keyword matcher with a learned vendor → category table.
#[derive(Debug)]
pub struct KeywordCategorizer {
    learned: RwLock<HashMap<String, String>>,
    accuracy: RwLock<f64>,
    version: RwLock<u32>,
}

impl KeywordCategorizer {
    pub fn new() -> Self {
        Self {
            learned: RwLock::new(HashMap::new()),
            accuracy: RwLock::new(0.72),
            version: RwLock::new(1),
        }
    }

    fn score(&self, expense: &ExpenseRecord) -> BTreeMap<String, f64> {
        let text = haystack(&expense.vendor, &expense.description);
        let mut raw: BTreeMap<String, f64> = KEYWORDS
            .iter()
            .map(|(category, words)| {
                let hits = words.iter().filter(|w| text.contains(*w)).count();
                (category.to_string(), hits as f64)
            })
            .collect();

        let vendor_key = expense.vendor.trim().to_lowercase();
        if let Some(category) = self.learned.read().unwrap().get(&vendor_key) {
            *raw.entry(category.clone()).or_insert(0.0) += 3.0;
        }
        if let Some(prior) = &expense.category {
            *raw.entry(prior.clone()).or_insert(0.0) += 1.0;
        }

        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return BTreeMap::from([(FALLBACK_CATEGORY.to_string(), 1.0)]);
        }
        raw.retain(|_, v| *v > 0.0);
        raw.into_iter().map(|(k, v)| (k, v / total)).collect()
    }
}

impl Default for KeywordCategorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProvider for KeywordCategorizer {
    async fn accuracy_metric(&self) -> Result<f64, ProviderError> {
        Ok(*self.accuracy.read().unwrap())
    }

    /// Examples are `{"vendor": ..., "category": ...}` objects.
    async fn retrain(&self, examples: Vec<JsonValue>) -> Result<(), ProviderError> {
        let labelled: Vec<LabelledVendor> = examples
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| ProviderError::invalid_input(format!("categorization example: {e}")))?;

        let mut learned = self.learned.write().unwrap();
        for example in labelled {
            learned.insert(example.vendor.trim().to_lowercase(), example.category);
        }
        let known = learned.len() as f64;
        drop(learned);

        // More labelled vendors, better coverage; saturates below 1.
        *self.accuracy.write().unwrap() = 0.72 + 0.25 * (known / (known + 50.0));
        *self.version.write().unwrap() += 1;
        Ok(())
    }
}

#[async_trait]
impl CategorizationProvider for KeywordCategorizer {
    async fn predict(&self, expense: &ExpenseRecord) -> Result<CategoryPrediction, ProviderError> {
        let confidence = self.score(expense);
        let predicted_category = confidence
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string());

        Ok(CategoryPrediction {
            expense_id: expense.id.clone(),
            predicted_category,
            confidence,
            model_version: format!("keyword-v{}", *self.version.read().unwrap()),
        })
    }
}
