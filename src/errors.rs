// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("M-Pesa authentication failed: {0}")]
    AuthError(String),

    #[error("Gateway error: {0}")]
    GatewayError(String),

    #[error("Push request rejected by gateway: {0}")]
    PushRejected(String),

    #[error("Duplicate checkout request id: {0}")]
    DuplicateCheckoutRequestId(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Reconciliation error: {0}")]
    ReconciliationError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::AuthError(_) => (StatusCode::BAD_GATEWAY, "M-Pesa authentication failed".to_string()),
            AppError::GatewayError(_) => (StatusCode::BAD_GATEWAY, "M-Pesa gateway error".to_string()),
            AppError::PushRejected(desc) => (StatusCode::BAD_GATEWAY, desc.clone()),
            AppError::DuplicateCheckoutRequestId(_) => (StatusCode::CONFLICT, "Duplicate transaction".to_string()),
            AppError::TransactionNotFound(_) => (StatusCode::NOT_FOUND, "Transaction not found".to_string()),
            AppError::ReconciliationError(_) => (StatusCode::BAD_GATEWAY, "Gateway contract violation".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Manual From implementations
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::GatewayError(format!("HTTP request failed: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(err: std::num::ParseIntError) -> Self {
        AppError::ValidationError(format!("Integer parsing error: {}", err))
    }
}

// Helper conversion functions
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        AppError::GatewayError(msg.into())
    }

    pub fn reconciliation(msg: impl Into<String>) -> Self {
        AppError::ReconciliationError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
