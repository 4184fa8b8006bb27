//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: provider set, dispatcher, job manager, session manager
//! - `routes/`: HTTP routes + handlers (one file per capability area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use spendlens_infra::AllowedOrigins;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Room for multipart boundaries and headers on top of the upload itself.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let cors = cors_layer(&services.config.allowed_origins);
    let body_limit = services.config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/ws/real-time-analysis", get(routes::realtime::upgrade))
        .nest("/api/v1", routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(Extension(services)),
        )
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        AllowedOrigins::Any => base.allow_origin(Any),
        AllowedOrigins::List(list) => {
            let parsed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "ignoring unusable CORS origin");
                        None
                    }
                })
                .collect();
            base.allow_origin(AllowOrigin::list(parsed))
        }
    }
}
