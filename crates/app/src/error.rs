//! Typed error taxonomy for the gateway, and its HTTP mapping.
//!
//! Mirrors the existing server's small `AppError` pattern but generalizes
//! it from four ad hoc cases to the full error-kind taxonomy the gateway
//! needs: configuration, remote-service, validation, parsing, rate
//! limiting, and not-found errors each get their own variant so callers
//! can match on kind instead of parsing message strings.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration missing: {message}")]
    ConfigMissing { message: String },

    #[error("remote service unavailable: {message}")]
    RemoteUnavailable { message: String },

    #[error("remote service returned a bad response: {message}")]
    RemoteBadResponse { message: String },

    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("parse failure: {message}")]
    ParseFailure { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    fn code(&self) -> &'static str {
        match self {
            Self::ConfigMissing { .. } => "config_missing",
            Self::RemoteUnavailable { .. } => "remote_unavailable",
            Self::RemoteBadResponse { .. } => "remote_bad_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::Validation { .. } => "validation",
            Self::ParseFailure { .. } => "parse_failure",
            Self::NotFound { .. } => "not_found",
            Self::Database(_) => "remote_unavailable",
            Self::Http(_) => "remote_unavailable",
            Self::Json(_) => "parse_failure",
            Self::Other(_) => "remote_unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::ConfigMissing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RemoteUnavailable { .. } | Self::Database(_) | Self::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::RemoteBadResponse { .. } => StatusCode::BAD_GATEWAY,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::ParseFailure { .. } | Self::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Other(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    details: Vec<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.code().to_string(),
            details: vec![self.to_string()],
        };
        (status, Json(json!(body))).into_response()
    }
}
