use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::QueryRejection,
        Extension, Multipart, Query,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::dto;
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/validate-receipt", post(validate_receipt))
        .route("/enhanced-ocr", post(enhanced_ocr))
}

struct Upload {
    file_name: String,
    bytes: Vec<u8>,
}

/// Pull the `file` part out of a multipart body.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Upload, axum::response::Response> {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                rejection.body_text(),
            ));
        }
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(errors::json_error(e.status(), "invalid_request", e.body_text()));
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        return match field.bytes().await {
            Ok(bytes) => Ok(Upload {
                file_name,
                bytes: bytes.to_vec(),
            }),
            Err(e) => Err(errors::json_error(e.status(), "invalid_request", e.body_text())),
        };
    }

    Err(errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_request",
        "multipart field `file` is required",
    ))
}

pub async fn validate_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> axum::response::Response {
    let upload = match read_upload(multipart).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match services
        .router
        .validate_receipt(&upload.bytes, &upload.file_name)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::gateway_error_to_response(e, "Failed to validate receipt"),
    }
}

pub async fn enhanced_ocr(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::OcrQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                rejection.body_text(),
            );
        }
    };
    let upload = match read_upload(multipart).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match services
        .router
        .enhanced_ocr(&upload.bytes, &upload.file_name, query.enhance_image)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::gateway_error_to_response(e, "Failed to process receipt"),
    }
}
