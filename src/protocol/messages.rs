//! Protocol message types for the match engine
//!
//! Every message on the wire is a tagged envelope: a `type` string drawn
//! from the closed registry below, a JSON payload whose schema is fixed
//! by that type, and an optional correlation id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};

// =============================================================================
// Type registry
// =============================================================================

// Client -> Server
pub const TYPE_JOIN_QUEUE: &str = "join_queue";
pub const TYPE_CANCEL_QUEUE: &str = "cancel_queue";
pub const TYPE_ACCEPT_BOT_FILL: &str = "accept_bot_fill";
pub const TYPE_JOIN_PRIVATE: &str = "join_private";
pub const TYPE_READY_STATE: &str = "ready_state";
pub const TYPE_SUBMIT_ANSWER: &str = "submit_answer";
pub const TYPE_LEAVE_MATCH: &str = "leave_match";
pub const TYPE_REQUEST_PROGRESS: &str = "request_progress";

// Server -> Client
pub const TYPE_QUEUE_UPDATE: &str = "queue_update";
pub const TYPE_BOT_OFFER: &str = "bot_offer";
pub const TYPE_MATCH_FOUND: &str = "match_found";
pub const TYPE_PRIVATE_ROOM_UPDATE: &str = "private_room_update";
pub const TYPE_COUNTDOWN: &str = "countdown";
pub const TYPE_QUESTION_BATCH: &str = "question_batch";
pub const TYPE_QUESTION_TICK: &str = "question_tick";
pub const TYPE_ANSWER_ACK: &str = "answer_ack";
pub const TYPE_PROGRESS_UPDATE: &str = "progress_update";
pub const TYPE_MATCH_COMPLETE: &str = "match_complete";
pub const TYPE_LEADERBOARD_UPDATE: &str = "leaderboard_update";
pub const TYPE_MATCH_TIMEOUT: &str = "match_timeout";
pub const TYPE_ERROR: &str = "error";
pub const TYPE_PING: &str = "ping";
pub const TYPE_PONG: &str = "pong";

/// Envelope wrapping every payload with its type and optional request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    /// Build an envelope with a typed payload
    pub fn new<T: Serialize>(kind: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            kind: kind.to_string(),
            payload: serde_json::to_value(payload)?,
            request_id: None,
        })
    }

    /// Decode the payload against the schema its type dictates
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            MatchError::invalid_payload(format!("invalid {} payload: {}", self.kind, e))
        })
    }

    /// Build an error envelope carrying a stable code
    pub fn error(err: &MatchError) -> Self {
        let payload = ErrorPayload {
            code: err.code().to_string(),
            message: err.message(),
        };
        Self {
            kind: TYPE_ERROR.to_string(),
            payload: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
            request_id: None,
        }
    }
}

// =============================================================================
// Client messages (incoming)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinQueuePayload {
    /// 5, 10, or 15; defaults server-side
    #[serde(default)]
    pub question_count: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
    /// Recorded for future compatibility filtering, not used today
    #[serde(default)]
    pub preferred_difficulty: Option<String>,
    /// Whether a bot opponent may be offered after the wait threshold
    #[serde(default)]
    pub bot_ok: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelQueuePayload {
    pub queue_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptBotFillPayload {
    pub queue_token: String,
    pub accept: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPrivatePayload {
    pub room_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyStatePayload {
    pub match_id: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerPayload {
    pub match_id: String,
    pub question_token: String,
    pub answer: String,
    #[serde(default)]
    pub client_latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveMatchPayload {
    pub match_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestProgressPayload {
    pub match_id: String,
}

// =============================================================================
// Server messages (outgoing)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueUpdatePayload {
    pub queue_token: String,
    pub status: String,
    /// Observed position, 0 = front, -1 = missing; advisory only
    pub position: i64,
    pub wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotOfferPayload {
    pub queue_token: String,
    pub deadline_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFoundPayload {
    pub match_id: String,
    pub mode: String,
    pub players: Vec<PlayerInfo>,
    pub question_count: usize,
    pub per_question_seconds: u64,
    pub global_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateRoomUpdatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub room_code: String,
    pub players: Vec<PlayerInfo>,
    pub slots_remaining: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountdownPayload {
    pub match_id: String,
    pub seconds: u64,
}

/// One question as the client sees it. There is deliberately no field
/// for the correct answer here; the token is the only handle the client
/// may present on submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub order: usize,
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBatchPayload {
    pub match_id: String,
    pub batch: Vec<QuestionPayload>,
    pub seed: String,
    pub issued_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionTickPayload {
    pub match_id: String,
    pub question_order: usize,
    pub remaining_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerAckPayload {
    pub match_id: String,
    pub question_order: usize,
    pub accepted: bool,
    pub server_received_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub user_id: String,
    pub answered: usize,
    pub pending: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdatePayload {
    pub match_id: String,
    pub players: Vec<PlayerProgress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResultPayload {
    pub user_id: String,
    pub username: String,
    pub final_score: u32,
    pub accuracy: f64,
    pub streak_bonus_applied: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCompletePayload {
    pub match_id: String,
    pub results: Vec<MatchResultPayload>,
    pub leaderboard_eligible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntryPayload {
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub score: i64,
    pub wins: u64,
    pub games: u64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardUpdatePayload {
    pub window: String,
    pub top: Vec<LeaderboardEntryPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTimeoutPayload {
    pub match_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingPayload {
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongPayload {
    pub timestamp: u64,
}
