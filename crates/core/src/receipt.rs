//! Receipt artifacts and extraction results.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::ArtifactId;

/// Reference to a stored transient artifact, handed to validation/OCR providers.
///
/// The artifact only exists for the duration of the request that stored it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub id: ArtifactId,
    pub path: PathBuf,
    /// Sanitized caller-supplied name (informational only).
    pub original_name: String,
    pub size: usize,
}

/// Key fields extracted from a receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptFields {
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub vendor: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticityVerdict {
    Authentic,
    Suspicious,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub source_artifact_id: ArtifactId,
    pub extracted_fields: ReceiptFields,
    pub confidence_per_field: BTreeMap<String, f64>,
    pub authenticity_verdict: Option<AuthenticityVerdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub source_artifact_id: ArtifactId,
    pub extracted_fields: ReceiptFields,
    pub confidence_per_field: BTreeMap<String, f64>,
    pub raw_text: String,
    pub enhanced: bool,
}
