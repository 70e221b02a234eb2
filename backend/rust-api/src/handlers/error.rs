use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::services::{quiz_service::QuizError, referral_service::ReferralError};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", err);
        ApiError::Internal("Internal server error".to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::BadRequest(format!("Validation error: {}", err))
    }
}

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        match err {
            QuizError::Validation(message) => ApiError::BadRequest(message),
            QuizError::SessionNotFound => ApiError::NotFound(err.to_string()),
            QuizError::SessionCompleted => ApiError::Conflict(err.to_string()),
            QuizError::Internal(e) => e.into(),
        }
    }
}

impl From<ReferralError> for ApiError {
    fn from(err: ReferralError) -> Self {
        match err {
            ReferralError::Validation(message) => ApiError::BadRequest(message),
            ReferralError::NotFound => ApiError::NotFound(err.to_string()),
            ReferralError::Internal(e) => e.into(),
            // Informational outcomes; services resolve them before returning.
            ReferralError::AlreadyProcessed | ReferralError::CapExceeded { .. } => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        let json_response = serde_json::json!({
            "message": message,
            "status": status.as_u16()
        });
        (status, Json(json_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_not_found_maps_to_404() {
        let response = ApiError::from(ReferralError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_hide_details() {
        match ApiError::from(anyhow::anyhow!("mongo exploded")) {
            ApiError::Internal(message) => assert_eq!(message, "Internal server error"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
