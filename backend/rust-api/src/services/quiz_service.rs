use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::metrics::{self, BADGE_UNLOCKS_TOTAL, QUIZ_SESSIONS_TOTAL};
use crate::models::gamification::{Badge, BADGES};
use crate::models::quiz::{
    BadgeStatus, BadgeUnlockEvent, CompleteSessionResponse, ProgressResponse, QuizSession,
    QuizSessionStatus, ScoredAnswer, StartSessionResponse, SubmitAnswerRequest,
    SubmitAnswerResponse, UserQuizStats,
};
use crate::repositories::Repositories;
use crate::services::gamification::{
    calculate_points, current_grade, next_grade, unlocked_badges, FAST_ANSWER_SECONDS,
};

#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("{0}")]
    Validation(String),
    #[error("Quiz session not found")]
    SessionNotFound,
    #[error("Quiz session already completed")]
    SessionCompleted,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type QuizResult<T> = Result<T, QuizError>;

pub struct QuizService {
    repos: Repositories,
    config: QuizConfig,
}

impl QuizService {
    pub fn new(repos: Repositories, config: QuizConfig) -> Self {
        Self { repos, config }
    }

    pub async fn start_session(&self, user_id: &str) -> QuizResult<StartSessionResponse> {
        let now = Utc::now();
        let ttl = self.session_ttl();
        let session = QuizSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            started_at: now,
            expires_at: now + chrono::Duration::seconds(ttl.as_secs() as i64),
            status: QuizSessionStatus::Active,
            answers: Vec::new(),
        };

        self.repos.quiz_sessions.put_session(&session, ttl).await?;

        QUIZ_SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!("Quiz session {} started for user {}", session.id, user_id);

        Ok(StartSessionResponse {
            session_id: session.id,
            started_at: session.started_at,
            expires_at: session.expires_at,
        })
    }

    /// Scores one answer. Re-submitting a question returns the points it was
    /// first awarded and leaves the session untouched.
    pub async fn submit_answer(
        &self,
        user_id: &str,
        session_id: &str,
        req: &SubmitAnswerRequest,
    ) -> QuizResult<SubmitAnswerResponse> {
        let now = Utc::now();
        let mut session = self.load_owned_session(user_id, session_id, now).await?;
        if session.status == QuizSessionStatus::Completed {
            return Err(QuizError::SessionCompleted);
        }

        if let Some(existing) = session.find_answer(&req.question_id) {
            tracing::debug!(
                "Duplicate answer for question {} in session {}",
                req.question_id,
                session_id
            );
            return Ok(SubmitAnswerResponse {
                question_id: existing.question_id.clone(),
                points: existing.points,
                session_points: session.points(),
                answered: session.answers.len(),
                duplicate: true,
            });
        }

        if session.answers.len() >= self.config.max_questions_per_session {
            return Err(QuizError::Validation(format!(
                "A quiz session accepts at most {} answers",
                self.config.max_questions_per_session
            )));
        }

        let points = calculate_points(req.is_correct, req.elapsed_seconds);
        session.answers.push(ScoredAnswer {
            question_id: req.question_id.clone(),
            is_correct: req.is_correct,
            elapsed_seconds: req.elapsed_seconds,
            points,
        });

        self.repos
            .quiz_sessions
            .put_session(&session, remaining_ttl(&session, now))
            .await?;

        metrics::record_answer(req.is_correct, points);

        Ok(SubmitAnswerResponse {
            question_id: req.question_id.clone(),
            points,
            session_points: session.points(),
            answered: session.answers.len(),
            duplicate: false,
        })
    }

    pub async fn complete_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> QuizResult<CompleteSessionResponse> {
        let now = Utc::now();
        let mut session = self.load_owned_session(user_id, session_id, now).await?;
        if session.status == QuizSessionStatus::Completed {
            return Err(QuizError::SessionCompleted);
        }

        let summary = session.summary(FAST_ANSWER_SECONDS);
        let mut stats = self.load_stats(user_id).await?;
        stats.record_session(&summary, now.date_naive());
        self.repos.quiz_stats.save_stats(user_id, &stats).await?;

        // Only sequential repeats are refused; the session key is not locked
        // against two completions racing each other.
        session.status = QuizSessionStatus::Completed;
        self.repos
            .quiz_sessions
            .put_session(&session, remaining_ttl(&session, now))
            .await?;

        let newly_unlocked = self.record_new_unlocks(user_id, &stats, now).await?;

        QUIZ_SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
        tracing::info!(
            "Quiz session {} completed: {} points, {} answers, {} new badges",
            session_id,
            summary.points,
            summary.answers,
            newly_unlocked.len()
        );

        Ok(CompleteSessionResponse {
            session_id: session.id,
            session_points: summary.points,
            grade: current_grade(stats.total_points),
            stats,
            newly_unlocked,
        })
    }

    pub async fn progress(&self, user_id: &str) -> QuizResult<ProgressResponse> {
        let stats = self.load_stats(user_id).await?;
        let unlocks: HashMap<String, DateTime<Utc>> = self
            .repos
            .badge_unlocks
            .list_unlocks(user_id)
            .await?
            .into_iter()
            .map(|event| (event.badge_id, event.unlocked_at))
            .collect();
        let eligible: Vec<&str> = unlocked_badges(&stats)
            .into_iter()
            .map(|badge| badge.id.as_str())
            .collect();

        let badges = BADGES
            .iter()
            .map(|badge| {
                let unlocked_at = unlocks.get(&badge.id).copied();
                BadgeStatus {
                    badge: badge.clone(),
                    unlocked: unlocked_at.is_some() || eligible.contains(&badge.id.as_str()),
                    unlocked_at,
                }
            })
            .collect();

        let next = next_grade(stats.total_points);
        Ok(ProgressResponse {
            grade: current_grade(stats.total_points),
            next_grade: next,
            points_to_next_grade: next.map(|g| g.min_points.saturating_sub(stats.total_points)),
            stats,
            badges,
        })
    }

    /// Keeps the best (lowest) weekly leaderboard rank for the user.
    pub async fn record_weekly_rank(&self, user_id: &str, rank: u32) -> QuizResult<UserQuizStats> {
        if rank == 0 {
            return Err(QuizError::Validation("rank starts at 1".to_string()));
        }

        let mut stats = self.load_stats(user_id).await?;
        stats.record_weekly_rank(rank);
        self.repos.quiz_stats.save_stats(user_id, &stats).await?;
        self.record_new_unlocks(user_id, &stats, Utc::now()).await?;

        Ok(stats)
    }

    async fn load_stats(&self, user_id: &str) -> QuizResult<UserQuizStats> {
        Ok(self
            .repos
            .quiz_stats
            .get_stats(user_id)
            .await?
            .unwrap_or_default())
    }

    async fn load_owned_session(
        &self,
        user_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> QuizResult<QuizSession> {
        let session = self
            .repos
            .quiz_sessions
            .get_session(session_id)
            .await?
            .ok_or(QuizError::SessionNotFound)?;

        if session.user_id != user_id {
            tracing::warn!(
                "User {} tried to access quiz session {} owned by another user",
                user_id,
                session_id
            );
            return Err(QuizError::SessionNotFound);
        }
        if session.expires_at <= now {
            return Err(QuizError::SessionNotFound);
        }

        Ok(session)
    }

    async fn record_new_unlocks(
        &self,
        user_id: &str,
        stats: &UserQuizStats,
        now: DateTime<Utc>,
    ) -> QuizResult<Vec<Badge>> {
        let mut newly_unlocked = Vec::new();
        for badge in unlocked_badges(stats) {
            let event = BadgeUnlockEvent {
                user_id: user_id.to_string(),
                badge_id: badge.id.clone(),
                unlocked_at: now,
            };
            if self.repos.badge_unlocks.record_unlock(&event).await? {
                BADGE_UNLOCKS_TOTAL.with_label_values(&[&badge.id]).inc();
                tracing::info!("User {} unlocked badge {}", user_id, badge.id);
                newly_unlocked.push(badge.clone());
            }
        }
        Ok(newly_unlocked)
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session_ttl_seconds.max(1))
    }
}

fn remaining_ttl(session: &QuizSession, now: DateTime<Utc>) -> Duration {
    (session.expires_at - now)
        .to_std()
        .unwrap_or_default()
        .max(Duration::from_secs(1))
}
