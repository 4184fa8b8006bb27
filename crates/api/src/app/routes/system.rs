use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::app::services::AppServices;

/// Liveness plus per-capability health. Always 200; `status` is `degraded`
/// when any capability reports unhealthy.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let report = services.router.health().await;
    let status = if report.all_healthy() { "healthy" } else { "degraded" };

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now(),
            "started_at": services.started_at,
            "capabilities": report.capabilities,
            "active_sessions": services.sessions.active_count(),
            "jobs": report.jobs,
            "artifacts": report.artifacts,
        })),
    )
        .into_response()
}
