use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use genforge_pipeline::{EngineError, LedgerError, StoreError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent `{error, code}` JSON
/// bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// An error from the job service.
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A provider notification failed authentication or parsing.
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Engine(engine) => classify_engine_error(engine),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::InvalidNotification(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_NOTIFICATION",
                msg.clone(),
            ),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map job service errors to an HTTP status, error code and message.
///
/// Storage failures become 500 with a sanitized message so a provider
/// retries the delivery.
fn classify_engine_error(err: &EngineError) -> (StatusCode, &'static str, String) {
    match err {
        EngineError::InvalidParams(msg) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
        EngineError::InsufficientBalance { .. } => (
            StatusCode::PAYMENT_REQUIRED,
            "INSUFFICIENT_BALANCE",
            err.to_string(),
        ),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        EngineError::ProviderNotEnabled(_) => (
            StatusCode::NOT_FOUND,
            "PROVIDER_NOT_ENABLED",
            err.to_string(),
        ),
        EngineError::Store(StoreError::Conflict(msg)) => {
            (StatusCode::CONFLICT, "CONFLICT", msg.clone())
        }
        EngineError::Ledger(LedgerError::InvalidAmount(_)) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
        }
        other => {
            tracing::error!(error = %other, "Job service error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
