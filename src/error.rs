use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Query submission failed: {0}")]
    Submission(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Result fetch failed: {0}")]
    Fetch(String),

    #[error("Execution {handle} did not complete after {attempts} status polls")]
    Timeout { handle: String, attempts: u32 },

    #[error("Execution {handle} ended in state {state}")]
    JobFailed { handle: String, state: String },

    #[error("Wait on execution {0} was cancelled")]
    Cancelled(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Submission(_)
            | AppError::Transport(_)
            | AppError::Fetch(_)
            | AppError::JobFailed { .. }
            | AppError::Json(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MalformedRow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Config(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
