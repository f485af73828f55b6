//! Service error taxonomy and HTTP mapping.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

static EXPOSE_STACKS: AtomicBool = AtomicBool::new(false);

/// Enable or disable stack inclusion in error response bodies.
/// Stacks are only useful (and only safe) outside production.
pub fn set_expose_stacks(expose: bool) {
    EXPOSE_STACKS.store(expose, Ordering::Relaxed);
}

/// Main error type for service operations.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Input(String),

    #[error("unauthorized")]
    Auth,

    #[error("rate limit exceeded")]
    RateLimited {
        limit: u32,
        window: &'static str,
        reset_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transcript provider error: {0}")]
    UpstreamTranscript(String),

    #[error("metadata provider error: {0}")]
    UpstreamMetadata(String),

    #[error("embedding provider error: {0}")]
    UpstreamEmbedding(String),

    #[error("llm provider error: {0}")]
    UpstreamLlm(String),

    #[error("email provider error: {0}")]
    UpstreamEmail(String),

    #[error("store error: {0}")]
    Store(#[from] crate::repository::StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Input(_) => StatusCode::BAD_REQUEST,
            AppError::Auth => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamTranscript(_)
            | AppError::UpstreamMetadata(_)
            | AppError::UpstreamEmbedding(_)
            | AppError::UpstreamLlm(_)
            | AppError::UpstreamEmail(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short kind label used in error sink records and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Input(_) => "input",
            AppError::Auth => "auth",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::NotFound(_) => "not_found",
            AppError::UpstreamTranscript(_) => "upstream_transcript",
            AppError::UpstreamMetadata(_) => "upstream_metadata",
            AppError::UpstreamEmbedding(_) => "upstream_embedding",
            AppError::UpstreamLlm(_) => "upstream_llm",
            AppError::UpstreamEmail(_) => "upstream_email",
            AppError::Store(_) => "store",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Rate limit responses carry their reset metadata (headers are
        // attached by the rate-limited handlers, which know the caps).
        if let AppError::RateLimited {
            limit,
            window,
            reset_at,
        } = &self
        {
            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": "Too many requests, slow down",
                "limit": limit,
                "window": window,
                "resetAt": reset_at.to_rfc3339(),
            });
            return (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
        }

        let mut body = serde_json::json!({ "error": self.to_string() });
        if EXPOSE_STACKS.load(Ordering::Relaxed) {
            body["stack"] = serde_json::Value::String(format!("{:?}", self));
        }
        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Input("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Auth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::NotFound("video x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::UpstreamLlm("boom".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(AppError::Auth.kind(), "auth");
        assert_eq!(AppError::Internal("x".into()).kind(), "internal");
    }
}
