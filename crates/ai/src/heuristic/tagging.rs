use async_trait::async_trait;
use chrono::Datelike;
use serde_json::{Value as JsonValue, json};

use spendlens_core::{ExpenseMetadata, ExpenseRecord, TagSet};

use super::haystack;
use crate::error::ProviderError;
use crate::provider::{AutoTaggingProvider, CapabilityProvider};

const TAG_KEYWORDS: &[(&str, &[&str])] = &[
    ("client-facing", &["client", "customer"]),
    ("team", &["team", "offsite", "all-hands"]),
    ("travel", &["flight", "hotel", "airline", "taxi", "train"]),
    ("recurring", &["subscription", "monthly", "renewal"]),
    ("meals", &["lunch", "dinner", "breakfast", "coffee"]),
];

const HIGH_VALUE_THRESHOLD: f64 = 1_000.0;

#[derive(Debug, Default)]
pub struct KeywordTagger;

impl KeywordTagger {
    pub fn new() -> Self {
        Self
    }
}

/// `#proj-alpha` or `project alpha` in the description.
fn project_of(description: &str) -> Option<String> {
    let lower = description.to_lowercase();
    if let Some(idx) = lower.find("#proj-") {
        let rest = &lower[idx + "#proj-".len()..];
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        return (!name.is_empty()).then_some(name);
    }
    let mut words = lower.split_whitespace();
    while let Some(word) = words.next() {
        if word == "project" {
            return words.next().map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string());
        }
    }
    None
}

#[async_trait]
impl CapabilityProvider for KeywordTagger {
    async fn accuracy_metric(&self) -> Result<f64, ProviderError> {
        Ok(0.9)
    }

    async fn retrain(&self, _examples: Vec<JsonValue>) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(
            "keyword tagging has no trainable parameters".to_string(),
        ))
    }
}

#[async_trait]
impl AutoTaggingProvider for KeywordTagger {
    async fn generate_tags(&self, expense: &ExpenseRecord) -> Result<TagSet, ProviderError> {
        let text = haystack(&expense.vendor, &expense.description);
        let mut tags: Vec<String> = TAG_KEYWORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| text.contains(*w)))
            .map(|(tag, _)| tag.to_string())
            .collect();

        if expense.amount >= HIGH_VALUE_THRESHOLD {
            tags.push("high-value".to_string());
        }
        if let Some(project) = project_of(&expense.description) {
            tags.push(format!("project:{project}"));
        }

        let confidence = if tags.is_empty() { 0.5 } else { 0.9 };
        Ok(TagSet { tags, confidence })
    }

    async fn extract_metadata(&self, expense: &ExpenseRecord) -> Result<ExpenseMetadata, ProviderError> {
        let mut metadata = ExpenseMetadata::new();
        metadata.insert(
            "vendor_normalized".to_string(),
            json!(expense.vendor.trim().to_lowercase()),
        );
        metadata.insert("weekday".to_string(), json!(expense.date.weekday().to_string()));
        metadata.insert("quarter".to_string(), json!(expense.date.month0() / 3 + 1));
        if let Some(project) = project_of(&expense.description) {
            metadata.insert("project".to_string(), json!(project));
        }
        Ok(metadata)
    }
}
