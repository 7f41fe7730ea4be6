//! Shared plumbing for the hyper-based HTTP surfaces.
//!
//! Every listener in the platform routes by matching on `(Method, path)`
//! and answers JSON. Errors use a single body shape,
//! `{"error":{"code","message","details"}}`, mapped onto
//! 400/401/403/404/429/500/503.

pub mod security;

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default cap on accepted request bodies.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// A JSON response with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<String> {
    let body = serde_json::to_string(value)
        .unwrap_or_else(|_| r#"{"error":{"code":"internal_error","message":"serialization failed"}}"#.to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .unwrap()
}

/// The standard error body.
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response<String> {
    error_response_with(status, code, message, serde_json::Value::Null)
}

/// The standard error body with structured details.
pub fn error_response_with(
    status: StatusCode,
    code: &str,
    message: &str,
    details: serde_json::Value,
) -> Response<String> {
    json_response(
        status,
        &serde_json::json!({
            "error": {
                "code": code,
                "message": message,
                "details": details,
            }
        }),
    )
}

/// 404 for unknown routes.
pub fn not_found() -> Response<String> {
    error_response(StatusCode::NOT_FOUND, "not_found", "no such route")
}

/// 405 for known routes with the wrong method.
pub fn method_not_allowed() -> Response<String> {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        "method not allowed",
    )
}

/// 429 with `Retry-After` for callers that should back off.
pub fn too_many_requests(retry_after_secs: u64) -> Response<String> {
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "rate limit exceeded",
    );
    response.headers_mut().insert(
        "Retry-After",
        retry_after_secs.to_string().parse().unwrap(),
    );
    response
}

/// Collect a request body up to `limit` bytes.
///
/// Oversized or unreadable bodies become a ready-made error response.
pub async fn read_body(body: Incoming, limit: usize) -> Result<Vec<u8>, Response<String>> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes().to_vec()),
        Err(_) => Err(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "request body too large or unreadable",
        )),
    }
}

/// Collect and parse a JSON request body.
pub async fn read_json<T: DeserializeOwned>(
    body: Incoming,
    limit: usize,
) -> Result<T, Response<String>> {
    let bytes = read_body(body, limit).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            &format!("invalid JSON body: {e}"),
        )
    })
}

/// Map a platform error onto the standard error response.
pub fn platform_error_response(err: &crate::error::PlatformError) -> Response<String> {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, err.code(), &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let response = error_response(StatusCode::BAD_REQUEST, "validation_error", "bad input");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body["error"]["code"], "validation_error");
        assert_eq!(body["error"]["message"], "bad input");
    }

    #[test]
    fn test_rate_limited_has_retry_after() {
        let response = too_many_requests(7);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["Retry-After"], "7");
    }

    #[test]
    fn test_platform_error_mapping() {
        let err = crate::error::PlatformError::QueueFull;
        let response = platform_error_response(&err);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
