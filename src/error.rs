use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::util::sanitize::sanitize_message;

/// Failures that reach the caller. AI-layer failures never appear here.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Could not connect to the database: {0}")]
    Connection(String),

    #[error("The generated query could not be executed: {message}")]
    QueryExecution { sql: String, message: String },

    #[error("The {stage} step timed out after {seconds} seconds, please try again")]
    Timeout { stage: &'static str, seconds: u64 },

    #[error("The database has no tables to report on")]
    EmptySchema,

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql: Option<String>,
}

impl ReportError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReportError::Connection(_) => "connection_error",
            ReportError::QueryExecution { .. } => "query_execution_error",
            ReportError::Timeout { .. } => "timeout_error",
            ReportError::EmptySchema => "empty_schema",
            ReportError::BadRequest(_) => "bad_request",
            ReportError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ReportError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReportError::QueryExecution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ReportError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ReportError::EmptySchema | ReportError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ReportError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            ReportError::QueryExecution { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Scrubs the connection string and credentials out of database messages.
    pub fn sanitize(self, connection_string: &str) -> Self {
        match self {
            ReportError::Connection(msg) => {
                ReportError::Connection(sanitize_message(&msg, connection_string))
            }
            ReportError::QueryExecution { sql, message } => ReportError::QueryExecution {
                sql,
                message: sanitize_message(&message, connection_string),
            },
            ReportError::Internal(msg) => {
                ReportError::Internal(sanitize_message(&msg, connection_string))
            }
            other => other,
        }
    }
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: sanitize_message(&self.to_string(), ""),
            sql: self.sql().map(str::to_string),
        };

        (self.status(), Json(body)).into_response()
    }
}
