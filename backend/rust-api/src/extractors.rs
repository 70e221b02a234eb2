use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};

use crate::handlers::error::ApiError;

/// `Json` extractor whose rejections use the API error body
/// (`{"message", "status": 400}`) instead of axum's plain text.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                tracing::warn!("Rejected request body: {}", rejection.body_text());
                Err(ApiError::bad_request(describe(&rejection)).into_response())
            }
        }
    }
}

fn describe(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Expected request with `Content-Type: application/json`".to_string()
        }
        other => format!("Failed to parse JSON request body: {}", other.body_text()),
    }
}
