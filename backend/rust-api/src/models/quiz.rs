use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::gamification::{Badge, Grade};

/// A single answered trivia question, as reported by the quiz UI.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerEvent {
    pub is_correct: bool,
    #[validate(range(min = 0.0, message = "elapsedSeconds must be non-negative"))]
    pub elapsed_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct PointsResponse {
    pub points: u32,
}

/// Cumulative quiz statistics for one user.
///
/// `accuracy` is derived from `correct_answers / total_answers` and kept in the
/// record so readers do not need the raw counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserQuizStats {
    pub total_points: u64,
    pub total_quizzes: u32,
    pub accuracy: f64,
    pub current_streak: u32,
    pub best_streak: u32,
    pub best_weekly_rank: Option<u32>,
    pub total_answers: u32,
    pub correct_answers: u32,
    pub last_quiz_date: Option<NaiveDate>,
    pub has_perfect_score: bool,
    pub has_fast_answer: bool,
}

/// Aggregate of one finished quiz session, folded into [`UserQuizStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionSummary {
    pub points: u64,
    pub answers: u32,
    pub correct: u32,
    pub has_fast_answer: bool,
}

impl SessionSummary {
    pub fn is_perfect(&self) -> bool {
        self.answers > 0 && self.correct == self.answers
    }
}

impl UserQuizStats {
    /// Folds a completed session into the running totals.
    ///
    /// Streaks count consecutive calendar days with at least one completed quiz:
    /// another quiz on the same day leaves the streak unchanged, a quiz on the
    /// following day extends it, anything else restarts it at 1.
    pub fn record_session(&mut self, summary: &SessionSummary, today: NaiveDate) {
        self.total_points += summary.points;
        self.total_quizzes += 1;
        self.total_answers += summary.answers;
        self.correct_answers += summary.correct;
        self.accuracy = if self.total_answers == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.total_answers as f64 * 100.0
        };

        self.current_streak = match self.last_quiz_date {
            Some(last) if last == today => self.current_streak.max(1),
            Some(last) if last.succ_opt() == Some(today) => self.current_streak + 1,
            _ => 1,
        };
        self.best_streak = self.best_streak.max(self.current_streak);
        self.last_quiz_date = Some(match self.last_quiz_date {
            Some(last) if last > today => last,
            _ => today,
        });

        self.has_perfect_score |= summary.is_perfect();
        self.has_fast_answer |= summary.has_fast_answer;
    }

    /// Lower rank numbers are better; only an improvement is kept.
    pub fn record_weekly_rank(&mut self, rank: u32) {
        self.best_weekly_rank = Some(match self.best_weekly_rank {
            Some(best) => best.min(rank),
            None => rank,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizSessionStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredAnswer {
    pub question_id: String,
    pub is_correct: bool,
    pub elapsed_seconds: f64,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: QuizSessionStatus,
    #[serde(default)]
    pub answers: Vec<ScoredAnswer>,
}

impl QuizSession {
    pub fn points(&self) -> u64 {
        self.answers.iter().map(|a| a.points as u64).sum()
    }

    pub fn find_answer(&self, question_id: &str) -> Option<&ScoredAnswer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    pub fn summary(&self, fast_answer_seconds: f64) -> SessionSummary {
        SessionSummary {
            points: self.points(),
            answers: self.answers.len() as u32,
            correct: self.answers.iter().filter(|a| a.is_correct).count() as u32,
            has_fast_answer: self
                .answers
                .iter()
                .any(|a| a.is_correct && a.elapsed_seconds < fast_answer_seconds),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 128, message = "questionId must be 1-128 characters"))]
    pub question_id: String,
    pub is_correct: bool,
    #[validate(range(min = 0.0, message = "elapsedSeconds must be non-negative"))]
    pub elapsed_seconds: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    pub question_id: String,
    pub points: u32,
    pub session_points: u64,
    pub answered: usize,
    /// True when this question was already scored in the session.
    pub duplicate: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSessionResponse {
    pub session_id: String,
    pub session_points: u64,
    pub stats: UserQuizStats,
    pub grade: &'static Grade,
    pub newly_unlocked: Vec<Badge>,
}

/// First time a badge became eligible for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeUnlockEvent {
    pub user_id: String,
    pub badge_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeStatus {
    #[serde(flatten)]
    pub badge: Badge,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub stats: UserQuizStats,
    pub grade: &'static Grade,
    pub next_grade: Option<&'static Grade>,
    pub points_to_next_grade: Option<u64>,
    pub badges: Vec<BadgeStatus>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyRankRequest {
    #[validate(range(min = 1, message = "rank starts at 1"))]
    pub rank: u32,
}
