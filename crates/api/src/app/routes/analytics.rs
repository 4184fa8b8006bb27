use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use crate::app::dto::{self, ApiJson};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/predict-budget", post(predict_budget))
        .route("/analyze-trends", post(analyze_trends))
        .route("/predict-approval-time", post(predict_approval_time))
}

pub async fn predict_budget(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(body): ApiJson<dto::PredictBudgetRequest>,
) -> axum::response::Response {
    let forecast = match services
        .router
        .forecast_budget(body.historical_data, body.prediction_months)
        .await
    {
        Ok(f) => f,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to predict budget"),
    };

    (StatusCode::OK, Json(forecast)).into_response()
}

pub async fn analyze_trends(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(body): ApiJson<dto::AnalyzeTrendsRequest>,
) -> axum::response::Response {
    let trends = match services
        .router
        .analyze_trends(body.expenses, &body.analysis_type)
        .await
    {
        Ok(t) => t,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to analyze trends"),
    };

    let analysis_type = trends.granularity.as_str().to_string();
    (StatusCode::OK, Json(dto::TrendsResponse { trends, analysis_type })).into_response()
}

pub async fn predict_approval_time(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(body): ApiJson<dto::ApprovalTimeRequest>,
) -> axum::response::Response {
    let estimate = match services
        .router
        .predict_approval_time(body.expense, body.approval_history)
        .await
    {
        Ok(e) => e,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to predict approval time"),
    };

    (
        StatusCode::OK,
        Json(dto::ApprovalTimeResponse {
            estimated_hours: estimate.estimated_hours,
            confidence: estimate.confidence,
            timestamp: Utc::now(),
        }),
    )
        .into_response()
}
