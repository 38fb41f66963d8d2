/// Error handling for the API server
///
/// This module provides a unified error type that maps to HTTP responses.
/// All handlers should return `Result<T, ApiError>` which automatically
/// converts to appropriate HTTP status codes.
///
/// # Example
///
/// ```
/// use flagstream_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler(events: Vec<String>) -> ApiResult<Json<serde_json::Value>> {
///     if events.is_empty() {
///         return Err(ApiError::BadRequest("no events".to_string()));
///     }
///     Ok(Json(json!({ "published": events.len() })))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flagstream_shared::provider::ProviderError;
use flagstream_shared::pubsub::publisher::PublishError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Payload too large (413) - batch over the configured limit
    PayloadTooLarge(String),

    /// Service unavailable (503) - pub/sub backend unreachable
    ServiceUnavailable(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "bad_request", "service_unavailable")
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Convert provider errors to API errors
impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Config(msg) => ApiError::BadRequest(msg),
            ProviderError::Backend(e) => ApiError::ServiceUnavailable(e.to_string()),
            ProviderError::Managed(e) => ApiError::ServiceUnavailable(e.to_string()),
        }
    }
}

/// Convert publish errors to API errors
impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::BadMessage(e) => ApiError::BadRequest(e.to_string()),
            PublishError::Backend(e) => ApiError::ServiceUnavailable(e.to_string()),
            PublishError::Managed(msg) => ApiError::ServiceUnavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagstream_shared::pubsub::publisher::EncodeError;
    use flagstream_shared::redis::RedisClientError;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::ServiceUnavailable("redis unreachable".to_string());
        assert_eq!(err.to_string(), "Service unavailable: redis unreachable");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (ApiError::ServiceUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_conversions() {
        let config: ApiError = ProviderError::Config("topic must not be empty".into()).into();
        assert!(matches!(config, ApiError::BadRequest(_)));

        let backend: ApiError =
            PublishError::Backend(RedisClientError::ConnectionError("refused".into())).into();
        assert!(matches!(backend, ApiError::ServiceUnavailable(_)));

        let encode: ApiError = PublishError::BadMessage(EncodeError("bad".into())).into();
        assert!(matches!(encode, ApiError::BadRequest(_)));
    }
}
