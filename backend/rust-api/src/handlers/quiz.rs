use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::error::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::gamification::{BADGES, GRADES};
use crate::models::quiz::{
    CompleteSessionResponse, PointsResponse, ProgressResponse, QuizAnswerEvent,
    SubmitAnswerRequest, SubmitAnswerResponse,
};
use crate::services::gamification::{calculate_points, current_grade};
use crate::services::quiz_service::QuizService;
use crate::services::AppState;

fn quiz_service(state: &AppState) -> QuizService {
    QuizService::new(state.repos.clone(), state.config.quiz.clone())
}

/// POST /api/v1/quiz/points - score a single answer without a session
pub async fn score_answer(
    AppJson(event): AppJson<QuizAnswerEvent>,
) -> Result<Json<PointsResponse>, ApiError> {
    event.validate()?;
    Ok(Json(PointsResponse {
        points: calculate_points(event.is_correct, event.elapsed_seconds),
    }))
}

/// GET /api/v1/quiz/grades
pub async fn list_grades() -> impl IntoResponse {
    Json(json!({ "grades": &GRADES[..] }))
}

/// GET /api/v1/quiz/grades/{points}
pub async fn grade_for_points(Path(points): Path<u64>) -> impl IntoResponse {
    Json(json!({ "grade": current_grade(points) }))
}

/// GET /api/v1/quiz/badges
pub async fn list_badges() -> impl IntoResponse {
    Json(json!({ "badges": &*BADGES }))
}

/// POST /api/v1/quiz/sessions
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let session = quiz_service(&state).start_session(&claims.sub).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/v1/quiz/sessions/{id}/answers
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<Json<SubmitAnswerResponse>, ApiError> {
    req.validate()?;
    let result = quiz_service(&state)
        .submit_answer(&claims.sub, &session_id, &req)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/quiz/sessions/{id}/complete
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<CompleteSessionResponse>, ApiError> {
    let result = quiz_service(&state)
        .complete_session(&claims.sub, &session_id)
        .await?;
    Ok(Json(result))
}

/// GET /api/v1/quiz/progress
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<ProgressResponse>, ApiError> {
    Ok(Json(quiz_service(&state).progress(&claims.sub).await?))
}
