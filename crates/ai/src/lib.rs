//! `spendlens-ai`: capability provider contracts.
//!
//! The gateway only ever talks to providers through the traits in
//! [`provider`]. [`heuristic`] ships deterministic implementations so the
//! service runs without trained models.

pub mod error;
pub mod heuristic;
pub mod provider;
pub mod registry;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use error::ProviderError;
pub use provider::{
    AutoTaggingProvider, CapabilityProvider, CategorizationProvider, FraudDetectionProvider,
    OcrProvider, PredictiveAnalyticsProvider, ReceiptValidationProvider,
};
pub use registry::CapabilitySet;
