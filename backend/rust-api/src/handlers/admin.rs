use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::error::ApiError;
use crate::extractors::AppJson;
use crate::models::quiz::{UserQuizStats, WeeklyRankRequest};
use crate::models::reward::ReconciliationJob;
use crate::services::quiz_service::QuizService;
use crate::services::AppState;

#[derive(Debug, Deserialize)]
pub struct PendingJobsQuery {
    pub limit: Option<usize>,
}

/// GET /admin/reconciliation - unresolved reward steps, oldest first
pub async fn list_reconciliation_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingJobsQuery>,
) -> Result<Json<Vec<ReconciliationJob>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let jobs = state.repos.reconciliation.pending(limit).await?;
    Ok(Json(jobs))
}

/// PUT /admin/quiz/{user_id}/weekly-rank
pub async fn record_weekly_rank(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    AppJson(req): AppJson<WeeklyRankRequest>,
) -> Result<Json<UserQuizStats>, ApiError> {
    req.validate()?;

    let stats = QuizService::new(state.repos.clone(), state.config.quiz.clone())
        .record_weekly_rank(&user_id, req.rank)
        .await?;
    tracing::info!("Weekly rank {} recorded for user {}", req.rank, user_id);

    Ok(Json(stats))
}
