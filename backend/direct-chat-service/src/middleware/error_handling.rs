use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};

/// JSON body returned for every failed HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
}

// Map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let error_type = match err {
        AppError::BadRequest(_) | AppError::InvalidReference(_) => "validation_error",
        AppError::Unauthorized => "authorization_error",
        AppError::NotFound => "not_found_error",
        AppError::PolicyViolation(_) => "conflict_error",
        AppError::Persistence(_) => "unavailable_error",
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => "server_error",
    };

    let response = ErrorResponse {
        error: status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string(),
        message: err.to_string(),
        status: status.as_u16(),
        error_type: error_type.to_string(),
        code: err.code().to_string(),
    };

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    if status.is_server_error() {
        tracing::error!(code = err.code(), error = %err, "request failed");
    }
    HttpResponse::build(status).json(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_not_found() {
        let (status, body) = map_error(&AppError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "NOT_FOUND");
        assert_eq!(body.error, "Not Found");
    }

    #[test]
    fn test_map_persistence_is_unavailable() {
        let (status, body) = map_error(&AppError::Persistence("pool timeout".into()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error_type, "unavailable_error");
        assert!(body.message.contains("pool timeout"));
    }

    #[test]
    fn test_error_body_shape() {
        let (_, body) = map_error(&AppError::BadRequest("limit".into()));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "validation_error");
        assert_eq!(json["status"], 400);
        assert_eq!(json["code"], "BAD_REQUEST");
    }
}
