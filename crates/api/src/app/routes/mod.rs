use axum::Router;

pub mod analytics;
pub mod categorization;
pub mod fraud;
pub mod models;
pub mod realtime;
pub mod receipts;
pub mod system;
pub mod tagging;

/// Router for the `/api/v1` endpoints.
pub fn router() -> Router {
    Router::new()
        .merge(categorization::router())
        .merge(fraud::router())
        .merge(analytics::router())
        .merge(receipts::router())
        .merge(tagging::router())
        .merge(models::router())
}
