use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use spendlens_core::GatewayError;

/// Map a gateway failure to an HTTP response.
///
/// Client errors echo their detail. Capability and artifact failures only
/// expose `failure_message`; the detail goes to the log.
pub fn gateway_error_to_response(
    err: GatewayError,
    failure_message: &'static str,
) -> axum::response::Response {
    match err {
        GatewayError::InvalidRequest(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_request", msg)
        }
        GatewayError::JobSubmissionError(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "job_submission_error", msg)
        }
        GatewayError::SessionProtocolError(msg) => {
            json_error(StatusCode::BAD_REQUEST, "session_protocol_error", msg)
        }
        GatewayError::CapabilityTimeout { .. } => {
            tracing::warn!(error = %err, "request timed out");
            json_error(StatusCode::GATEWAY_TIMEOUT, err.code(), failure_message)
        }
        GatewayError::CapabilityFailure { .. } | GatewayError::ArtifactError(_) => {
            tracing::error!(error = %err, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, err.code(), failure_message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendlens_core::Capability;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (GatewayError::invalid_request("x"), StatusCode::BAD_REQUEST),
            (GatewayError::job_submission("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (
                GatewayError::capability_failure(Capability::Ocr, "x"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                GatewayError::CapabilityTimeout {
                    capability: Capability::Ocr,
                    timeout_ms: 10,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (GatewayError::artifact("disk full"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(gateway_error_to_response(err, "Failed").status(), status);
        }
    }
}
