use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use spendlens_ai::CapabilitySet;
use spendlens_core::GatewayError;
use spendlens_infra::{
    ConcurrentDispatcher, GatewayConfig, RequestRouter, RouterLimits, SessionManager,
    TransientArtifactStore,
    jobs::{InMemoryJobRegistry, JobRegistry, JobRegistryError, RetrainingConfig, RetrainingJobManager},
};

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("artifact store: {0}")]
    Artifacts(#[from] GatewayError),
    #[error("job registry: {0}")]
    Registry(#[from] JobRegistryError),
}

/// Everything the handlers need, built once at startup.
#[derive(Debug)]
pub struct AppServices {
    pub router: Arc<RequestRouter>,
    pub sessions: Arc<SessionManager>,
    registry: Arc<InMemoryJobRegistry>,
    pub config: GatewayConfig,
    pub started_at: DateTime<Utc>,
}

impl AppServices {
    /// Production wiring with the built-in heuristic providers.
    pub async fn build(config: GatewayConfig) -> Result<Self, ServicesError> {
        Self::with_capabilities(CapabilitySet::heuristic(), config).await
    }

    pub async fn with_capabilities(
        capabilities: CapabilitySet,
        config: GatewayConfig,
    ) -> Result<Self, ServicesError> {
        let artifacts = TransientArtifactStore::new(&config.artifact_dir);
        let swept = artifacts.prepare().await?;
        if swept > 0 {
            tracing::info!(swept, dir = %config.artifact_dir.display(), "removed leftover artifacts");
        }

        let registry = Arc::new(match &config.job_snapshot_path {
            Some(path) => InMemoryJobRegistry::with_snapshot(path).await?,
            None => InMemoryJobRegistry::new(),
        });

        let jobs = RetrainingJobManager::start(
            capabilities.clone(),
            registry.clone() as Arc<dyn JobRegistry>,
            RetrainingConfig {
                max_concurrent: config.retrain_max_concurrent,
                estimate: config.retrain_estimate,
                retention: config.job_retention,
                retention_max: config.job_retention_max,
                ..RetrainingConfig::default()
            },
        );

        let router = Arc::new(RequestRouter::new(
            capabilities,
            ConcurrentDispatcher::new(config.dispatch_timeout),
            artifacts,
            jobs,
            RouterLimits {
                max_batch_size: config.max_batch_size,
                max_upload_bytes: config.max_upload_bytes,
            },
        ));
        let sessions = Arc::new(SessionManager::new(router.clone(), config.session_idle_timeout));

        tracing::info!(
            dispatch_timeout_ms = config.dispatch_timeout.as_millis() as u64,
            max_batch_size = config.max_batch_size,
            "gateway services ready"
        );

        Ok(Self {
            router,
            sessions,
            registry,
            config,
            started_at: Utc::now(),
        })
    }

    /// Stop retraining lanes and wait for the job snapshot to catch up.
    /// Runs still in progress are reconciled as interrupted on next start.
    pub async fn shutdown(&self) {
        self.router.jobs().shutdown();
        self.registry.flush().await;
    }
}
