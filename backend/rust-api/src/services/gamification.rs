//! Quiz scoring: points per answer, grade tiers and badge eligibility.
//!
//! Everything here is a pure function over the static tables in
//! [`crate::models::gamification`]. Nothing fails: unexpected input degrades
//! to 0 points, the lowest grade, or a locked badge.

use crate::metrics::BADGE_REQUIREMENT_UNKNOWN_TOTAL;
use crate::models::gamification::{Badge, BadgeRequirement, Grade, BADGES, GRADES};
use crate::models::quiz::UserQuizStats;

pub const BASE_POINTS: u32 = 10;

/// Answers faster than this unlock the speed badge.
pub const FAST_ANSWER_SECONDS: f64 = 2.0;

/// Speed bonus steps: (exclusive upper bound in seconds, bonus).
const SPEED_BONUS: [(f64, u32); 4] = [(2.0, 10), (5.0, 7), (10.0, 5), (15.0, 3)];

pub fn calculate_points(is_correct: bool, elapsed_seconds: f64) -> u32 {
    if !is_correct {
        return 0;
    }
    if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
        tracing::warn!(
            "Ignoring answer with invalid elapsed time {}",
            elapsed_seconds
        );
        return 0;
    }

    let bonus = SPEED_BONUS
        .iter()
        .find(|(limit, _)| elapsed_seconds < *limit)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0);

    BASE_POINTS + bonus
}

/// Highest tier whose threshold is reached (thresholds are inclusive).
pub fn current_grade(points: u64) -> &'static Grade {
    GRADES
        .iter()
        .rev()
        .find(|grade| grade.min_points <= points)
        .unwrap_or(&GRADES[0])
}

pub fn next_grade(points: u64) -> Option<&'static Grade> {
    GRADES.iter().find(|grade| grade.min_points > points)
}

pub fn check_badge_unlock(badge: &Badge, stats: &UserQuizStats) -> bool {
    let requirement = match badge.requirement.parse::<BadgeRequirement>() {
        Ok(requirement) => requirement,
        Err(e) => {
            tracing::warn!("Badge '{}' is never unlockable: {}", badge.id, e);
            BADGE_REQUIREMENT_UNKNOWN_TOTAL
                .with_label_values(&[badge.id.as_str()])
                .inc();
            return false;
        }
    };

    match requirement {
        BadgeRequirement::FirstQuiz => stats.total_quizzes >= 1,
        BadgeRequirement::Quizzes10 => stats.total_quizzes >= 10,
        BadgeRequirement::Quizzes50 => stats.total_quizzes >= 50,
        BadgeRequirement::PerfectScore => stats.has_perfect_score,
        BadgeRequirement::SpeedDemon => stats.has_fast_answer,
        BadgeRequirement::Streak7 => stats.current_streak >= 7,
        BadgeRequirement::Streak30 => stats.current_streak >= 30,
        BadgeRequirement::Points1000 => stats.total_points >= 1000,
        BadgeRequirement::Accuracy90 => stats.accuracy >= 90.0 && stats.total_quizzes >= 5,
        BadgeRequirement::WeeklyChampion => stats.best_weekly_rank == Some(1),
    }
}

pub fn unlocked_badges(stats: &UserQuizStats) -> Vec<&'static Badge> {
    BADGES
        .iter()
        .filter(|badge| check_badge_unlock(badge, stats))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn badge_with(requirement: &str) -> Badge {
        Badge {
            id: format!("test_{}", requirement),
            name: "Test".into(),
            description: String::new(),
            icon: String::new(),
            color: String::new(),
            requirement: requirement.into(),
        }
    }

    #[test]
    fn incorrect_answers_score_zero() {
        for t in [0.0, 0.5, 1.99, 3.0, 9.0, 14.9, 15.0, 120.0] {
            assert_eq!(calculate_points(false, t), 0);
        }
    }

    #[test]
    fn correct_answers_follow_speed_buckets() {
        assert_eq!(calculate_points(true, 0.0), 20);
        assert_eq!(calculate_points(true, 1.5), 20);
        assert_eq!(calculate_points(true, 2.0), 17);
        assert_eq!(calculate_points(true, 4.99), 17);
        assert_eq!(calculate_points(true, 5.0), 15);
        assert_eq!(calculate_points(true, 7.0), 15);
        assert_eq!(calculate_points(true, 10.0), 13);
        assert_eq!(calculate_points(true, 14.99), 13);
        assert_eq!(calculate_points(true, 15.0), 10);
        assert_eq!(calculate_points(true, 600.0), 10);
    }

    #[test]
    fn points_never_increase_with_time() {
        let mut previous = u32::MAX;
        let mut t = 0.0;
        while t < 30.0 {
            let points = calculate_points(true, t);
            assert!(points <= previous);
            assert!((10..=20).contains(&points));
            previous = points;
            t += 0.25;
        }
    }

    #[test]
    fn invalid_elapsed_time_degrades_to_zero() {
        assert_eq!(calculate_points(true, -1.0), 0);
        assert_eq!(calculate_points(true, f64::NAN), 0);
        assert_eq!(calculate_points(true, f64::INFINITY), 0);
    }

    #[test]
    fn grade_boundaries_are_inclusive() {
        assert_eq!(current_grade(0).name, "Novice");
        assert_eq!(current_grade(199).name, "Novice");
        assert_eq!(current_grade(200).name, "Explorateur");
        assert_eq!(current_grade(1499).name, "Conteur");
        assert_eq!(current_grade(1500).name, "Gardien");
        assert_eq!(current_grade(5000).name, "Patriarche");
        assert_eq!(current_grade(u64::MAX).name, "Patriarche");
    }

    #[test]
    fn grade_is_monotonic_in_points() {
        let mut previous = 0;
        for points in (0..6000).step_by(50) {
            let grade = current_grade(points);
            assert!(grade.id >= previous);
            assert_eq!(grade, current_grade(points));
            previous = grade.id;
        }
    }

    #[test]
    fn next_grade_stops_at_top() {
        assert_eq!(next_grade(0).map(|g| g.name), Some("Explorateur"));
        assert_eq!(next_grade(1500).map(|g| g.name), Some("Sage"));
        assert!(next_grade(5000).is_none());
    }

    #[test]
    fn unknown_requirement_is_locked() {
        let stats = UserQuizStats {
            total_quizzes: 500,
            total_points: 100_000,
            ..Default::default()
        };
        assert!(!check_badge_unlock(&badge_with("collect_all_ancestors"), &stats));
    }

    #[test]
    fn badge_predicates_read_stats() {
        let stats = UserQuizStats {
            total_quizzes: 10,
            current_streak: 7,
            total_points: 999,
            accuracy: 92.0,
            best_weekly_rank: Some(1),
            has_fast_answer: true,
            ..Default::default()
        };

        assert!(check_badge_unlock(&badge_with("first_quiz"), &stats));
        assert!(check_badge_unlock(&badge_with("quizzes_10"), &stats));
        assert!(!check_badge_unlock(&badge_with("quizzes_50"), &stats));
        assert!(check_badge_unlock(&badge_with("streak_7"), &stats));
        assert!(!check_badge_unlock(&badge_with("streak_30"), &stats));
        assert!(!check_badge_unlock(&badge_with("points_1000"), &stats));
        assert!(check_badge_unlock(&badge_with("accuracy_90"), &stats));
        assert!(check_badge_unlock(&badge_with("weekly_champion"), &stats));
        assert!(check_badge_unlock(&badge_with("speed_demon"), &stats));
        assert!(!check_badge_unlock(&badge_with("perfect_score"), &stats));
    }

    #[test]
    fn accuracy_badge_needs_enough_quizzes() {
        let stats = UserQuizStats {
            total_quizzes: 2,
            accuracy: 100.0,
            ..Default::default()
        };
        assert!(!check_badge_unlock(&badge_with("accuracy_90"), &stats));
    }

    #[test]
    fn new_user_has_no_badges() {
        assert!(unlocked_badges(&UserQuizStats::default()).is_empty());
    }
}
