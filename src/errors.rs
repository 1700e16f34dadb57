use crate::orchestrator::ConversationError;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types surfaced over HTTP.
#[derive(Debug)]
pub enum AppError {
    /// Storage-related errors.
    StoreError(StoreError),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Request conflicts with already-recorded state.
    Conflict(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::StoreError(e) => write!(f, "Storage error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Status code and client-facing message. Internal details stay in logs.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::StoreError(e) => {
                tracing::error!("Storage error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            AppError::WithContext { source, context } => {
                // Log full context chain, respond as the underlying error
                tracing::error!("Error with context: {} -> {}", context, source);
                source.status_and_message()
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreError(err)
    }
}

impl From<ConversationError> for AppError {
    fn from(err: ConversationError) -> Self {
        let message = err.to_string();
        match err {
            ConversationError::Store(e) => AppError::StoreError(e),
            ConversationError::Delivery(_) => AppError::ExternalApiError(message),
            ConversationError::InvalidPhone(_) | ConversationError::MissingResponse => {
                AppError::BadRequest(message)
            }
            ConversationError::NoConversation(_) => AppError::NotFound(message),
            ConversationError::ConcurrentUpdate(_) => AppError::Conflict(message),
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, StoreError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::StoreError(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_underlying_status() {
        let err: Result<(), AppError> = Err(AppError::NotFound("lead".to_string()));
        let wrapped = err.context("loading lead").unwrap_err();
        assert_eq!(wrapped.to_string(), "loading lead: Not found: lead");
        assert_eq!(wrapped.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_error_maps_to_500() {
        let err = AppError::from(StoreError::Unavailable("down".to_string()));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conversation_errors_map_to_client_statuses() {
        let missing = AppError::from(ConversationError::MissingResponse);
        assert_eq!(missing.into_response().status(), StatusCode::BAD_REQUEST);

        let unknown = AppError::from(ConversationError::NoConversation("+31612345678".to_string()));
        assert_eq!(unknown.into_response().status(), StatusCode::NOT_FOUND);

        let raced = AppError::from(ConversationError::ConcurrentUpdate("+31612345678".to_string()));
        assert_eq!(raced.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let err = AppError::Conflict("already answered".to_string());
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
