use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::decoder::DecodeError;

/// Failure of a single upstream fetch. The retry helper inspects the
/// rate-limited case to choose between exponential backoff and a flat delay.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("unexpected response shape: {0}")]
    BadResponse(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            FetchError::RateLimited
        } else {
            FetchError::Http(err)
        }
    }
}

/// Route-level error taxonomy. Everything a handler can fail with maps onto
/// one of these, and the IntoResponse impl produces the JSON bodies clients
/// rely on.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            ApiError::Internal(err) => {
                error!("unhandled error in request handler: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_not_rate_limited() {
        let err = FetchError::Decode(DecodeError::Unsupported);
        assert!(!err.is_rate_limited());
        assert!(FetchError::RateLimited.is_rate_limited());
    }
}
