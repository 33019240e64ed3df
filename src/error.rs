use crate::core::sql_guard::{UnsafeQuery, UnsafeReason};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// 全链路统一的错误类型，各阶段失败都以该类型返回到调用边界
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Schema introspection failed: {0}")]
    Introspection(String),

    #[error("Language model unavailable, please try again: {0}")]
    Oracle(String),

    #[error("Could not interpret question")]
    MalformedIntent { explanation: Option<String> },

    #[error("Question cannot be answered from this database: {0}")]
    Unanswerable(String),

    #[error("Unsafe query rejected ({reason}): {detail}")]
    UnsafeQuery { reason: UnsafeReason, detail: String },

    #[error("Query did not finish within {}ms", .0.as_millis())]
    ExecutionTimeout(Duration),

    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Database connection lost: {0}")]
    ConnectionLost(String),

    #[error("No database connection. Please connect to a database first.")]
    NotConnected,

    #[error("Table '{0}' does not exist")]
    UnknownTable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<UnsafeQuery> for AppError {
    fn from(err: UnsafeQuery) -> Self {
        AppError::UnsafeQuery {
            reason: err.reason,
            detail: err.detail,
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Connection(_)
            | AppError::MalformedIntent { .. }
            | AppError::Unanswerable(_)
            | AppError::UnsafeQuery { .. }
            | AppError::Execution(_)
            | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownTable(_) => StatusCode::NOT_FOUND,
            AppError::NotConnected => StatusCode::CONFLICT,
            AppError::Oracle(_) => StatusCode::BAD_GATEWAY,
            AppError::ConnectionLost(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExecutionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Introspection(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Connection(_) => "ConnectionError",
            AppError::Introspection(_) => "IntrospectionError",
            AppError::Oracle(_) => "OracleError",
            AppError::MalformedIntent { .. } => "MalformedIntentError",
            AppError::Unanswerable(_) => "UnanswerableQuestion",
            AppError::UnsafeQuery { .. } => "UnsafeQueryError",
            AppError::ExecutionTimeout(_) => "ExecutionTimeout",
            AppError::Execution(_) => "ExecutionError",
            AppError::ConnectionLost(_) => "ConnectionLost",
            AppError::NotConnected => "NotConnected",
            AppError::UnknownTable(_) => "UnknownTable",
            AppError::InvalidRequest(_) => "BadRequest",
            AppError::Config(_) => "ConfigError",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "type": self.error_type(),
            "message": self.to_string(),
        });
        match &self {
            AppError::UnsafeQuery { reason, .. } => {
                error["reason"] = json!(reason.code());
            }
            AppError::MalformedIntent {
                explanation: Some(text),
            } => {
                error["explanation"] = json!(text);
            }
            _ => {}
        }
        let body = json!({ "status": "error", "error": error });
        (self.status_code(), Json(body)).into_response()
    }
}
