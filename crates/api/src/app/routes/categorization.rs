use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use spendlens_core::ExpenseRecord;

use crate::app::dto::{self, ApiJson};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/categorize-expense", post(categorize_expense))
        .route("/batch-categorize", post(batch_categorize))
}

pub async fn categorize_expense(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(expense): ApiJson<ExpenseRecord>,
) -> axum::response::Response {
    let prediction = match services.router.categorize(expense).await {
        Ok(p) => p,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to categorize expense"),
    };

    (StatusCode::OK, Json(prediction)).into_response()
}

pub async fn batch_categorize(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(expenses): ApiJson<Vec<ExpenseRecord>>,
) -> axum::response::Response {
    let items = match services.router.batch_categorize(expenses).await {
        Ok(items) => items,
        Err(e) => return errors::gateway_error_to_response(e, "Failed to categorize expenses"),
    };

    let failed = items.iter().filter(|i| i.outcome.is_err()).count();
    if failed > 0 {
        tracing::info!(total = items.len(), failed, "batch completed with failures");
    }

    let body: Vec<dto::BatchItemView> = items.into_iter().map(Into::into).collect();
    (StatusCode::OK, Json(body)).into_response()
}
