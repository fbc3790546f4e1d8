//! Error handling for the match engine

use std::fmt;

/// Result type alias for match-engine operations
pub type Result<T> = std::result::Result<T, MatchError>;

/// Match engine error types. Every variant maps to a stable wire code
/// surfaced in the protocol `error` envelope and HTTP error bodies.
#[derive(Debug, Clone)]
pub enum MatchError {
    /// Rejected input (bad counts, malformed ids, ...)
    Validation(String),
    /// Missing or invalid bearer token
    Unauthorized(String),
    /// Authenticated but not allowed
    Forbidden(String),
    /// Guests may not create private rooms
    GuestsCannotCreateRooms,
    /// Room code does not resolve to a live room
    RoomNotFound(String),
    /// Match id does not resolve to a known match
    MatchNotFound(String),
    /// Queue token does not resolve to a waiting player
    QueueTokenNotFound(String),
    /// No player state for (match, user)
    PlayerStateNotFound(String),
    /// Room exists but is past the waiting phase
    RoomNotAccepting(String),
    /// Room is at max_players
    RoomFull(String),
    /// The same user may not occupy two slots
    UserAlreadyInRoom(String),
    /// The host is already a member
    HostCannotRejoin(String),
    /// Room start preconditions not met
    RoomCannotStart(String),
    /// A match needs two players
    NeedTwoPlayers(String),
    /// One AnswerRecord per question_order
    QuestionAlreadyAnswered(String),
    /// Submitted token matches no pack item
    InvalidQuestionToken(String),
    /// Curated store + AI could not fill the pack
    InsufficientQuestions(String),
    /// Cross-match filtering left the pack short
    InsufficientUniqueQuestions(String),
    /// Per-match lock is held by another operation; retryable
    LockHeld(String),
    /// No live connection for the target user
    ConnectionNotFound(String),
    /// Bounded outbound queue rejected the message
    SendQueueFull(String),
    /// Envelope type outside the closed set
    UnknownMessageType(String),
    /// Payload did not parse against the type's schema
    InvalidPayload(String),
    /// Wire name reserved, behavior not rolled out
    FeatureNotAvailable(String),
    /// Leaderboard window outside daily/weekly/monthly/all_time
    UnknownWindow(String),
    /// AI generator or other upstream failure after retries
    Upstream(String),
    /// Serialization failure
    Serialization(String),
    /// Unexpected server error
    Internal(String),
}

impl MatchError {
    /// Stable wire code for this error
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::Validation(_) => "invalid_request",
            MatchError::Unauthorized(_) => "unauthorized",
            MatchError::Forbidden(_) => "forbidden",
            MatchError::GuestsCannotCreateRooms => "guests_cannot_create_rooms",
            MatchError::RoomNotFound(_) => "room_not_found",
            MatchError::MatchNotFound(_) => "match_not_found",
            MatchError::QueueTokenNotFound(_) => "queue_token_not_found",
            MatchError::PlayerStateNotFound(_) => "player_state_not_found",
            MatchError::RoomNotAccepting(_) => "room_not_accepting_players",
            MatchError::RoomFull(_) => "room_full",
            MatchError::UserAlreadyInRoom(_) => "user_already_in_room",
            MatchError::HostCannotRejoin(_) => "host_cannot_rejoin",
            MatchError::RoomCannotStart(_) => "match_cannot_be_started",
            MatchError::NeedTwoPlayers(_) => "need_at_least_two_players",
            MatchError::QuestionAlreadyAnswered(_) => "question_already_answered",
            MatchError::InvalidQuestionToken(_) => "invalid_question_token",
            MatchError::InsufficientQuestions(_) => "insufficient_questions",
            MatchError::InsufficientUniqueQuestions(_) => "insufficient_unique_questions",
            MatchError::LockHeld(_) => "lock_already_held",
            MatchError::ConnectionNotFound(_) => "connection_not_found",
            MatchError::SendQueueFull(_) => "send_queue_full",
            MatchError::UnknownMessageType(_) => "unknown_message_type",
            MatchError::InvalidPayload(_) => "invalid_payload",
            MatchError::FeatureNotAvailable(_) => "feature_not_available",
            MatchError::UnknownWindow(_) => "unknown_leaderboard_window",
            MatchError::Upstream(_) => "upstream_error",
            MatchError::Serialization(_) => "internal_error",
            MatchError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for the REST surface
    pub fn http_status(&self) -> u16 {
        match self {
            MatchError::Validation(_)
            | MatchError::InvalidQuestionToken(_)
            | MatchError::UnknownMessageType(_)
            | MatchError::InvalidPayload(_)
            | MatchError::FeatureNotAvailable(_)
            | MatchError::UnknownWindow(_) => 400,
            MatchError::Unauthorized(_) => 401,
            MatchError::Forbidden(_) | MatchError::GuestsCannotCreateRooms => 403,
            MatchError::RoomNotFound(_)
            | MatchError::MatchNotFound(_)
            | MatchError::QueueTokenNotFound(_)
            | MatchError::PlayerStateNotFound(_)
            | MatchError::ConnectionNotFound(_) => 404,
            MatchError::RoomNotAccepting(_)
            | MatchError::RoomFull(_)
            | MatchError::UserAlreadyInRoom(_)
            | MatchError::HostCannotRejoin(_)
            | MatchError::RoomCannotStart(_)
            | MatchError::NeedTwoPlayers(_)
            | MatchError::QuestionAlreadyAnswered(_) => 409,
            MatchError::LockHeld(_) => 429,
            MatchError::InsufficientQuestions(_)
            | MatchError::InsufficientUniqueQuestions(_)
            | MatchError::SendQueueFull(_)
            | MatchError::Upstream(_) => 503,
            MatchError::Serialization(_) | MatchError::Internal(_) => 500,
        }
    }

    /// Human-readable message
    pub fn message(&self) -> String {
        match self {
            MatchError::GuestsCannotCreateRooms => {
                "Guests cannot create private rooms".to_string()
            }
            MatchError::Validation(m)
            | MatchError::Unauthorized(m)
            | MatchError::Forbidden(m)
            | MatchError::RoomNotFound(m)
            | MatchError::MatchNotFound(m)
            | MatchError::QueueTokenNotFound(m)
            | MatchError::PlayerStateNotFound(m)
            | MatchError::RoomNotAccepting(m)
            | MatchError::RoomFull(m)
            | MatchError::UserAlreadyInRoom(m)
            | MatchError::HostCannotRejoin(m)
            | MatchError::RoomCannotStart(m)
            | MatchError::NeedTwoPlayers(m)
            | MatchError::QuestionAlreadyAnswered(m)
            | MatchError::InvalidQuestionToken(m)
            | MatchError::InsufficientQuestions(m)
            | MatchError::InsufficientUniqueQuestions(m)
            | MatchError::LockHeld(m)
            | MatchError::ConnectionNotFound(m)
            | MatchError::SendQueueFull(m)
            | MatchError::UnknownMessageType(m)
            | MatchError::InvalidPayload(m)
            | MatchError::FeatureNotAvailable(m)
            | MatchError::UnknownWindow(m)
            | MatchError::Upstream(m)
            | MatchError::Serialization(m)
            | MatchError::Internal(m) => m.clone(),
        }
    }

    /// Create a validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        MatchError::Validation(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        MatchError::Unauthorized(msg.into())
    }

    /// Create an invalid-payload error
    pub fn invalid_payload<T: Into<String>>(msg: T) -> Self {
        MatchError::InvalidPayload(msg.into())
    }

    /// Create an upstream error
    pub fn upstream<T: Into<String>>(msg: T) -> Self {
        MatchError::Upstream(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        MatchError::Internal(msg.into())
    }
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for MatchError {}

impl From<std::io::Error> for MatchError {
    fn from(err: std::io::Error) -> Self {
        MatchError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for MatchError {
    fn from(err: serde_json::Error) -> Self {
        MatchError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for MatchError {
    fn from(err: reqwest::Error) -> Self {
        MatchError::Upstream(format!("HTTP client error: {}", err))
    }
}
