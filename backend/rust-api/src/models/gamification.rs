use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One tier of the grade ladder. Grades are derived from total points and
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: u8,
    pub name: &'static str,
    pub min_points: u64,
    pub icon: &'static str,
    pub color: &'static str,
    pub description: &'static str,
}

/// Ordered by `min_points`, starting at 0.
pub static GRADES: [Grade; 6] = [
    Grade {
        id: 0,
        name: "Novice",
        min_points: 0,
        icon: "🌱",
        color: "#8BC34A",
        description: "Premiers pas dans l'histoire familiale",
    },
    Grade {
        id: 1,
        name: "Explorateur",
        min_points: 200,
        icon: "🧭",
        color: "#4CAF50",
        description: "Explore les branches de l'arbre",
    },
    Grade {
        id: 2,
        name: "Conteur",
        min_points: 600,
        icon: "📜",
        color: "#009688",
        description: "Connaît les histoires de la famille",
    },
    Grade {
        id: 3,
        name: "Gardien",
        min_points: 1500,
        icon: "🛡️",
        color: "#3F51B5",
        description: "Veille sur la mémoire familiale",
    },
    Grade {
        id: 4,
        name: "Sage",
        min_points: 3000,
        icon: "🦉",
        color: "#9C27B0",
        description: "Référence de la famille",
    },
    Grade {
        id: 5,
        name: "Patriarche",
        min_points: 5000,
        icon: "👑",
        color: "#FFC107",
        description: "Gardien suprême des racines",
    },
];

/// Badge definition. `requirement` is kept as a raw key so catalog entries
/// loaded from storage can carry keys this build does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub requirement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeRequirement {
    FirstQuiz,
    Quizzes10,
    Quizzes50,
    PerfectScore,
    SpeedDemon,
    Streak7,
    Streak30,
    Points1000,
    Accuracy90,
    WeeklyChampion,
}

impl FromStr for BadgeRequirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_quiz" => Ok(Self::FirstQuiz),
            "quizzes_10" => Ok(Self::Quizzes10),
            "quizzes_50" => Ok(Self::Quizzes50),
            "perfect_score" => Ok(Self::PerfectScore),
            "speed_demon" => Ok(Self::SpeedDemon),
            "streak_7" => Ok(Self::Streak7),
            "streak_30" => Ok(Self::Streak30),
            "points_1000" => Ok(Self::Points1000),
            "accuracy_90" => Ok(Self::Accuracy90),
            "weekly_champion" => Ok(Self::WeeklyChampion),
            other => Err(format!("unknown badge requirement '{}'", other)),
        }
    }
}

fn badge(id: &str, name: &str, description: &str, icon: &str, color: &str) -> Badge {
    Badge {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        color: color.to_string(),
        requirement: id.to_string(),
    }
}

lazy_static! {
    pub static ref BADGES: Vec<Badge> = vec![
        badge("first_quiz", "Premier quiz", "Terminer un premier quiz", "🎯", "#2196F3"),
        badge("quizzes_10", "Habitué", "Terminer 10 quiz", "📚", "#03A9F4"),
        badge("quizzes_50", "Passionné", "Terminer 50 quiz", "🏛️", "#00BCD4"),
        badge("perfect_score", "Sans faute", "Répondre juste à toutes les questions d'un quiz", "💯", "#4CAF50"),
        badge("speed_demon", "Éclair", "Une bonne réponse en moins de 2 secondes", "⚡", "#FF9800"),
        badge("streak_7", "Une semaine", "7 jours de quiz d'affilée", "🔥", "#FF5722"),
        badge("streak_30", "Un mois", "30 jours de quiz d'affilée", "🌋", "#F44336"),
        badge("points_1000", "Millier", "Cumuler 1000 points", "💎", "#673AB7"),
        badge("accuracy_90", "Précision", "90% de bonnes réponses sur au moins 5 quiz", "🎖️", "#795548"),
        badge("weekly_champion", "Champion de la semaine", "Finir premier du classement hebdomadaire", "🏆", "#FFD700"),
    ];
}
