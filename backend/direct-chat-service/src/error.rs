use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    /// `reply_to` is malformed or points at a message that does not exist
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Edit/delete attempted by someone who does not own the message
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Operation blocked by the configured lifecycle policy
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("internal server error")]
    Internal,
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl AppError {
    /// Steady-state store errors are recoverable by retrying the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Persistence(_) | AppError::Internal)
    }

    /// Stable machine-readable code carried in WebSocket `error` frames and
    /// HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidReference(_) => "INVALID_REFERENCE",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotFound => "NOT_FOUND",
            AppError::Persistence(_) => "PERSISTENCE_FAILURE",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::PolicyViolation(_) => "POLICY_VIOLATION",
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::InvalidReference(_) => 400,
            AppError::Unauthorized => 403,
            AppError::NotFound => 404,
            AppError::PolicyViolation(_) => 409,
            AppError::Persistence(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => 500,
        }
    }
}
