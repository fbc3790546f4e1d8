//! Repository interfaces for durable storage
//!
//! SQL-backed implementations live outside this crate; the match engine
//! only consumes these traits. The in-memory implementations back the
//! default wiring and the test suite, and enforce the same invariants a
//! database would (monotone match status, one row per player).

use std::collections::HashMap;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{MatchError, Result};
use crate::model::{Match, MatchMode, MatchStatus, PlayerStatus};
use crate::questions::Question;

/// Subset of a match row the orchestrator reads back
#[derive(Debug, Clone)]
pub struct MatchSummary {
    pub id: Uuid,
    pub mode: MatchMode,
    pub question_count: usize,
    pub per_question_seconds: u64,
    pub leaderboard_eligible: bool,
    pub status: MatchStatus,
    pub room_code: Option<String>,
}

/// Final per-player outcome written at finalization
#[derive(Debug, Clone)]
pub struct PlayerResultRow {
    pub match_id: Uuid,
    pub user_id: Uuid,
    pub final_score: u32,
    pub accuracy: f64,
    pub streak_bonus_pct: f64,
    pub status: PlayerStatus,
    pub left_at: Option<u64>,
    pub answers: serde_json::Value,
}

/// Immutable leaderboard snapshot row
#[derive(Debug, Clone)]
pub struct LeaderboardSnapshot {
    pub time_window: String,
    pub generated_at: u64,
    pub entries: serde_json::Value,
    pub source_hash: String,
}

#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn insert_match(&self, m: &Match) -> Result<()>;
    async fn update_status(
        &self,
        id: Uuid,
        status: MatchStatus,
        started_at: Option<u64>,
        completed_at: Option<u64>,
    ) -> Result<()>;
    async fn summary(&self, id: Uuid) -> Result<MatchSummary>;
    async fn upsert_player_initial(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        is_guest: bool,
    ) -> Result<()>;
    async fn finalize_player(&self, row: PlayerResultRow) -> Result<()>;
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Up to `limit` verified questions, sampled at random
    async fn fetch_pool(&self, limit: usize) -> Result<Vec<Question>>;
    async fn insert_verified(&self, questions: &[Question]) -> Result<()>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn insert_snapshot(&self, snapshot: LeaderboardSnapshot) -> Result<()>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Default)]
pub struct MemoryMatchRepository {
    matches: RwLock<HashMap<Uuid, Match>>,
    players: RwLock<HashMap<(Uuid, Uuid), PlayerResultRow>>,
}

impl MemoryMatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test accessor for a finalized player row
    pub async fn player_result(&self, match_id: Uuid, user_id: Uuid) -> Option<PlayerResultRow> {
        let players = self.players.read().await;
        players.get(&(match_id, user_id)).cloned()
    }

    /// Test accessor for the stored match
    pub async fn stored_match(&self, id: Uuid) -> Option<Match> {
        let matches = self.matches.read().await;
        matches.get(&id).cloned()
    }
}

#[async_trait]
impl MatchRepository for MemoryMatchRepository {
    async fn insert_match(&self, m: &Match) -> Result<()> {
        let mut matches = self.matches.write().await;
        if matches.contains_key(&m.id) {
            return Err(MatchError::internal(format!("match {} already exists", m.id)));
        }
        matches.insert(m.id, m.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: MatchStatus,
        started_at: Option<u64>,
        completed_at: Option<u64>,
    ) -> Result<()> {
        let mut matches = self.matches.write().await;
        let m = matches
            .get_mut(&id)
            .ok_or_else(|| MatchError::MatchNotFound(format!("match {} not found", id)))?;
        if m.status.is_terminal() {
            return Err(MatchError::internal(format!(
                "match {} is terminal ({}), refusing status change to {}",
                id,
                m.status.as_str(),
                status.as_str()
            )));
        }
        m.status = status;
        if started_at.is_some() {
            m.started_at = started_at;
        }
        if completed_at.is_some() {
            m.completed_at = completed_at;
        }
        Ok(())
    }

    async fn summary(&self, id: Uuid) -> Result<MatchSummary> {
        let matches = self.matches.read().await;
        let m = matches
            .get(&id)
            .ok_or_else(|| MatchError::MatchNotFound(format!("match {} not found", id)))?;
        Ok(MatchSummary {
            id: m.id,
            mode: m.mode,
            question_count: m.question_count,
            per_question_seconds: m.per_question_seconds,
            leaderboard_eligible: m.leaderboard_eligible,
            status: m.status,
            room_code: m.room_code.clone(),
        })
    }

    async fn upsert_player_initial(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        is_guest: bool,
    ) -> Result<()> {
        let _ = is_guest;
        let mut players = self.players.write().await;
        players.entry((match_id, user_id)).or_insert(PlayerResultRow {
            match_id,
            user_id,
            final_score: 0,
            accuracy: 0.0,
            streak_bonus_pct: 0.0,
            status: PlayerStatus::Queued,
            left_at: None,
            answers: serde_json::Value::Null,
        });
        Ok(())
    }

    async fn finalize_player(&self, row: PlayerResultRow) -> Result<()> {
        let mut players = self.players.write().await;
        players.insert((row.match_id, row.user_id), row);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryQuestionRepository {
    pool: RwLock<Vec<Question>>,
}

impl MemoryQuestionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, questions: Vec<Question>) {
        let mut pool = self.pool.write().await;
        pool.extend(questions);
    }

    pub async fn len(&self) -> usize {
        self.pool.read().await.len()
    }
}

#[async_trait]
impl QuestionRepository for MemoryQuestionRepository {
    async fn fetch_pool(&self, limit: usize) -> Result<Vec<Question>> {
        let pool = self.pool.read().await;
        let mut rng = rand::thread_rng();
        Ok(pool
            .choose_multiple(&mut rng, limit.min(pool.len()))
            .cloned()
            .collect())
    }

    async fn insert_verified(&self, questions: &[Question]) -> Result<()> {
        let mut pool = self.pool.write().await;
        for q in questions {
            if !pool.iter().any(|existing| existing.id == q.id) {
                pool.push(q.clone());
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySnapshotRepository {
    rows: RwLock<Vec<LeaderboardSnapshot>>,
}

impl MemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshots(&self) -> Vec<LeaderboardSnapshot> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl SnapshotRepository for MemorySnapshotRepository {
    async fn insert_snapshot(&self, snapshot: LeaderboardSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.push(snapshot);
        Ok(())
    }
}
