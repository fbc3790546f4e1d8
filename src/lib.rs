//! Faceoff - Real-Time 1v1 Trivia Match Server
//!
//! This library implements the authoritative match engine for a
//! two-player trivia game: matchmaking, private rooms, question pack
//! assembly with anti-cheat tokens, per-match state behind leased
//! locks, scoring, and windowed leaderboards.
//!
//! ## Architecture
//!
//! - **Hub**: one live WebSocket per user, bounded outbound queues,
//!   per-match fan-out
//! - **Protocol**: tagged JSON envelopes over a closed type registry
//! - **Queue / Rooms**: random 1v1 pairing and six-digit private rooms
//! - **Assembler**: curated pool + AI fallback, two uniqueness layers,
//!   server-signed question tokens
//! - **Orchestrator**: match lifecycle under an exclusive per-match
//!   lock, deadline-driven timeout finalization
//! - **Leaderboard**: windowed ranked boards, pub/sub fan-out, periodic
//!   snapshots to durable storage
//!
//! ## Example
//!
//! ```rust,ignore
//! use faceoff::{App, Config, Repositories};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = App::new(Config::from_env(), Repositories::in_memory())?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod hub;
pub mod leaderboard;
pub mod model;
pub mod protocol;
pub mod questions;
pub mod queue;
pub mod rooms;
pub mod scoring;
pub mod server;
pub mod storage;
pub mod store;

pub use auth::{Claims, HmacTokenVerifier, TokenVerifier};
pub use config::Config;
pub use engine::handler::MatchHandler;
pub use engine::{FinalizeCause, MatchService, SubmitOutcome};
pub use error::{MatchError, Result};
pub use hub::{ConnectionHandle, Hub};
pub use leaderboard::LeaderboardService;
pub use model::{
    AnswerRecord, Match, MatchMode, MatchStatus, PlayerState, PlayerStatus, QuestionPackItem,
};
pub use queue::{MatchPair, MatchmakingQueue, MatchmakingRequest};
pub use rooms::{PrivateRoom, PrivateRoomRequest, RoomManager, RoomStatus};
pub use scoring::{ScoringConfig, ScoringEngine};
pub use server::{App, Repositories};
pub use store::MatchStateStore;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current timestamp in milliseconds since the UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_advances() {
        let a = current_timestamp();
        let b = current_timestamp();
        assert!(b >= a);
        // Sanity: after 2020, before 2100
        assert!(a > 1_577_836_800_000);
        assert!(a < 4_102_444_800_000);
    }
}
