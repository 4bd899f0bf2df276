//! Error types for the triggers domain.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type for trigger operations.
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Request-level errors.
///
/// Topic lookup failures are deliberately absent: they are recovered inside
/// recipient resolution and never reach the caller.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Request body or parameter failed validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The actor field does not denote a single concrete subscriber.
    #[error("Invalid actor: {0}")]
    InvalidActor(String),

    /// The transaction id is already bound to another trigger of this tenant.
    #[error("Transaction id '{0}' has already been used")]
    DuplicateTransaction(String),

    /// Tenant context headers are missing.
    #[error("Missing tenant context: {0}")]
    MissingTenant(String),

    /// The workflow engine rejected or could not accept the command.
    #[error("Workflow engine error: {0}")]
    Dispatch(String),

    /// A collaborator call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Redis backed collaborator failed.
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TriggerError {
    /// Machine-readable identifier used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerError::Validation(_) => "VALIDATION_ERROR",
            TriggerError::InvalidActor(_) => "INVALID_ACTOR",
            TriggerError::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
            TriggerError::MissingTenant(_) => "UNAUTHORIZED",
            TriggerError::Dispatch(_) => "DISPATCH_FAILED",
            TriggerError::Timeout(_) => "UPSTREAM_TIMEOUT",
            TriggerError::Queue(_) => "SERVICE_UNAVAILABLE",
            TriggerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Integer code for logs and dashboards.
    pub fn code(&self) -> i32 {
        match self {
            TriggerError::Validation(_) => 3001,
            TriggerError::InvalidActor(_) => 3002,
            TriggerError::DuplicateTransaction(_) => 3003,
            TriggerError::MissingTenant(_) => 3004,
            TriggerError::Dispatch(_) => 3101,
            TriggerError::Timeout(_) => 3102,
            TriggerError::Queue(_) => 3103,
            TriggerError::Internal(_) => 3199,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TriggerError::Validation(_) | TriggerError::InvalidActor(_) => StatusCode::BAD_REQUEST,
            TriggerError::DuplicateTransaction(_) => StatusCode::CONFLICT,
            TriggerError::MissingTenant(_) => StatusCode::UNAUTHORIZED,
            TriggerError::Dispatch(_) => StatusCode::BAD_GATEWAY,
            TriggerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TriggerError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            TriggerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned by every trigger endpoint.
///
/// ```json
/// { "code": 3003, "error": "DUPLICATE_TRANSACTION", "message": "...", "details": null }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub code: i32,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error_code = self.code(), error = %self, "Trigger request failed");
        } else {
            tracing::info!(error_code = self.code(), error = %self, "Trigger request rejected");
        }

        let body = Json(ErrorResponse {
            code: self.code(),
            error: self.kind().to_string(),
            message: self.to_string(),
            details: None,
        });

        (status, body).into_response()
    }
}

impl From<redis::RedisError> for TriggerError {
    fn from(err: redis::RedisError) -> Self {
        TriggerError::Queue(err.to_string())
    }
}

impl From<serde_json::Error> for TriggerError {
    fn from(err: serde_json::Error) -> Self {
        TriggerError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<validator::ValidationErrors> for TriggerError {
    fn from(err: validator::ValidationErrors) -> Self {
        TriggerError::Validation(err.to_string())
    }
}

/// Why a topic could not be expanded into its members.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicLookupError {
    #[error("Topic '{0}' not found")]
    NotFound(String),

    #[error("Not authorized to read topic '{0}'")]
    Unauthorized(String),

    #[error("Topic store error: {0}")]
    Backend(String),

    #[error("Topic lookup timed out after {0}ms")]
    Timeout(u128),
}

impl From<redis::RedisError> for TopicLookupError {
    fn from(err: redis::RedisError) -> Self {
        TopicLookupError::Backend(err.to_string())
    }
}

/// Failure sink could not record an entry. Never propagated into trigger
/// processing.
#[derive(Debug, Error)]
#[error("Failed to record resolution failure: {0}")]
pub struct SinkError(pub String);
