use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::dto::{self, ApiJson};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/detect-fraud", post(detect_fraud))
        .route("/risk-assessment", post(risk_assessment))
}

pub async fn detect_fraud(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(body): ApiJson<dto::DetectFraudRequest>,
) -> axum::response::Response {
    let alert = match services.router.detect_fraud(body.expense, body.user_history).await {
        Ok(a) => a,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to analyze fraud risk"),
    };

    (StatusCode::OK, Json(alert)).into_response()
}

pub async fn risk_assessment(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(body): ApiJson<dto::RiskAssessmentRequest>,
) -> axum::response::Response {
    match services.router.assess_risk(body.expense, body.company_policies).await {
        Ok(assessment) => (StatusCode::OK, Json(assessment)).into_response(),
        Err(e) => errors::gateway_error_to_response(e, "Failed to assess risk"),
    }
}
