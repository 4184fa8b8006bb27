use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value as JsonValue;

use spendlens_core::JobId;

use crate::app::dto::{self, ApiJson};
use crate::app::errors;
use crate::app::services::AppServices;

const DEFAULT_JOB_LIMIT: usize = 50;

pub fn router() -> Router {
    Router::new()
        .route("/model-performance", get(model_performance))
        .route("/retrain-models", post(retrain_models))
        .route("/retrain-models/jobs", get(list_jobs))
        .route("/retrain-models/jobs/:job_id", get(get_job))
}

pub async fn model_performance(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let performance = services.router.model_performance().await;
    (StatusCode::OK, Json(performance)).into_response()
}

pub async fn retrain_models(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(payload): ApiJson<JsonValue>,
) -> axum::response::Response {
    let submission = match services.router.submit_retraining(&payload) {
        Ok(s) => s,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to start retraining"),
    };

    tracing::info!(
        job_id = %submission.job.id,
        capabilities = submission.job.targeted_capabilities.len(),
        "retraining accepted"
    );
    (StatusCode::ACCEPTED, Json(dto::RetrainAccepted::from(submission))).into_response()
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::JobsQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT);
    match services.router.list_retraining(limit) {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => errors::gateway_error_to_response(e, "Failed to list retraining jobs"),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match job_id.parse() {
        Ok(id) => id,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to read retraining job"),
    };

    match services.router.retraining_status(job_id) {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no retraining job {job_id}"),
        ),
        Err(e) => errors::gateway_error_to_response(e, "Failed to read retraining job"),
    }
}
