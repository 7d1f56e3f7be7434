//! Application error types.
//!
//! Every service operation returns [`AppResult`]; handlers turn an [`AppError`]
//! into the standard `ApiResponse` error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Result alias used across all services.
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or missing request / configuration fields.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The driver could not establish or use a pool.
    #[error("{0}")]
    DatabaseConnection(String),

    /// No live connection (or saved configuration) for the given id.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// A query was issued against a connection that has no pool.
    #[error("Database is not connected")]
    NotConnected,

    /// Statement execution failed on the server.
    #[error("{message}")]
    Query {
        message: String,
        code: Option<String>,
    },

    /// The configuration document could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A referenced local file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The language model asked for a tool that is not registered.
    #[error("Function {0} not found.")]
    UnknownTool(String),

    /// A registered tool failed while running.
    #[error("{0}")]
    ToolExecution(String),

    /// The language model returned a response the agent cannot interpret.
    #[error("Invalid response from model: {0}")]
    AgentProtocol(String),

    /// The agent used every tool turn without producing a text answer.
    #[error("Model reached maximum tool call turns ({0}) without providing a final text response.")]
    MaxTurnsExceeded(usize),

    /// An upstream HTTP service (the language model endpoint) failed.
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Builds a query error without a driver code.
    pub fn query(message: impl Into<String>) -> Self {
        AppError::Query {
            message: message.into(),
            code: None,
        }
    }

    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::DatabaseConnection(_) => "CONNECTION_FAILED",
            AppError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            AppError::NotConnected => "NOT_CONNECTED",
            AppError::Query { .. } => "QUERY_FAILED",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::FileNotFound(_) => "FILE_NOT_FOUND",
            AppError::Io(_) => "IO_ERROR",
            AppError::UnknownTool(_) => "UNKNOWN_TOOL",
            AppError::ToolExecution(_) => "TOOL_FAILED",
            AppError::AgentProtocol(_) => "AGENT_PROTOCOL_ERROR",
            AppError::MaxTurnsExceeded(_) => "MAX_TURNS_EXCEEDED",
            AppError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::FileNotFound(_) => StatusCode::BAD_REQUEST,
            AppError::Query { .. } | AppError::DatabaseConnection(_) => StatusCode::BAD_REQUEST,
            AppError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotConnected => StatusCode::CONFLICT,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }

        let details = match &self {
            AppError::Query {
                code: Some(code), ..
            } => Some(serde_json::json!({ "driverCode": code })),
            _ => None,
        };
        let body = match details {
            Some(details) => ApiResponse::err_with_details(self.code(), self.to_string(), details),
            None => ApiResponse::err(self.code(), self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let err = AppError::ConnectionNotFound("abc".into());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "CONNECTION_NOT_FOUND");
    }

    #[test]
    fn test_query_error_displays_driver_message() {
        let err = AppError::Query {
            message: "Table 'shop.nope' doesn't exist".into(),
            code: Some("1146".into()),
        };
        assert_eq!(err.to_string(), "Table 'shop.nope' doesn't exist");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_max_turns_message_mentions_limit() {
        assert!(AppError::MaxTurnsExceeded(5).to_string().contains("(5)"));
    }
}
