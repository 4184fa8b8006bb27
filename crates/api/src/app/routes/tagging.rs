use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use spendlens_core::ExpenseRecord;

use crate::app::dto::ApiJson;
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/auto-tag", post(auto_tag))
}

pub async fn auto_tag(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(expense): ApiJson<ExpenseRecord>,
) -> axum::response::Response {
    match services.router.auto_tag(expense).await {
        Ok(tagged) => (StatusCode::OK, Json(tagged)).into_response(),
        Err(e) => errors::gateway_error_to_response(e, "Failed to generate tags"),
    }
}
