//! Orchestration layer: configuration, dispatch, routing, artifacts,
//! retraining jobs and realtime sessions.

pub mod artifacts;
pub mod config;
pub mod dispatcher;
pub mod jobs;
pub mod router;
pub mod sessions;

pub use artifacts::{ArtifactHandle, ArtifactStats, TransientArtifactStore};
pub use config::{AllowedOrigins, ConfigError, GatewayConfig, LogFormat};
pub use dispatcher::{ConcurrentDispatcher, Operation};
pub use router::{RequestRouter, RouterLimits};
pub use sessions::{SessionManager, SessionTransport};
