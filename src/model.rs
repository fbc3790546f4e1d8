//! Core domain types for matches, players, and question packs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Points are always non-negative
pub type Score = u32;

/// How a match was formed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    #[serde(rename = "random_1v1")]
    Random1v1,
    #[serde(rename = "private_room")]
    PrivateRoom,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Random1v1 => "random_1v1",
            MatchMode::PrivateRoom => "private_room",
        }
    }
}

/// Match lifecycle. Transitions are monotone:
/// pending -> active -> completed | timeout | cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Active,
    Completed,
    Timeout,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Active => "active",
            MatchStatus::Completed => "completed",
            MatchStatus::Timeout => "timeout",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal matches never mutate again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchStatus::Completed | MatchStatus::Timeout | MatchStatus::Cancelled
        )
    }
}

/// One game session between two players
#[derive(Debug, Clone)]
pub struct Match {
    pub id: Uuid,
    pub mode: MatchMode,
    pub question_count: usize,
    pub per_question_seconds: u64,
    pub global_timeout_seconds: u64,
    pub seed_hash: String,
    pub leaderboard_eligible: bool,
    pub status: MatchStatus,
    pub created_by: Uuid,
    /// Private-room matches carry their room code so the finalizer can
    /// route results to the room-specific leaderboard
    pub room_code: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

/// A question as served within one match. `correct_answer` deliberately
/// has no Serialize derive on this type; the wire payload is a separate
/// struct that cannot carry it.
#[derive(Debug, Clone)]
pub struct QuestionPackItem {
    /// 1-based position in the pack
    pub order: usize,
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    /// HMAC over `id:correct_answer`, the only handle a client may
    /// present on submit
    pub token: String,
    pub correct_answer: String,
}

/// Player participation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Queued,
    Active,
    Completed,
    LeftEarly,
    Timeout,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Queued => "queued",
            PlayerStatus::Active => "active",
            PlayerStatus::Completed => "completed",
            PlayerStatus::LeftEarly => "left_early",
            PlayerStatus::Timeout => "timeout",
        }
    }
}

/// One submitted (or synthesized) answer. `time_remaining_ms` is
/// recorded at submission so final aggregation reproduces the same
/// per-answer score without consulting the clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_order: usize,
    pub question_token: String,
    pub answer: String,
    pub submitted_at: u64,
    pub time_remaining_ms: u64,
    pub is_correct: bool,
    pub score_earned: Score,
}

/// Per-player state for one match, keyed (match_id, user_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub match_id: Uuid,
    pub user_id: Uuid,
    pub is_guest: bool,
    pub username: String,
    pub joined_at: u64,
    pub left_at: Option<u64>,
    pub status: PlayerStatus,
    pub final_score: Option<Score>,
    pub accuracy: Option<f64>,
    pub streak_bonus_pct: Option<f64>,
    pub answers: Vec<AnswerRecord>,
}

impl PlayerState {
    pub fn new(match_id: Uuid, user_id: Uuid, username: String, is_guest: bool, now: u64) -> Self {
        Self {
            match_id,
            user_id,
            is_guest,
            username,
            joined_at: now,
            left_at: None,
            status: PlayerStatus::Queued,
            final_score: None,
            accuracy: None,
            streak_bonus_pct: None,
            answers: Vec::new(),
        }
    }

    /// Whether an answer is already recorded for the given order
    pub fn has_answered(&self, question_order: usize) -> bool {
        self.answers.iter().any(|a| a.question_order == question_order)
    }

    /// Length of the trailing run of correct answers
    pub fn trailing_streak(&self) -> usize {
        self.answers
            .iter()
            .rev()
            .take_while(|a| a.is_correct)
            .count()
    }
}
