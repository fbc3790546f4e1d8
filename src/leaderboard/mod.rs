//! Leaderboard aggregation
//!
//! Windowed ranked boards (daily/weekly/monthly/all_time) plus
//! room-code-keyed boards for private matches. Every recorded result
//! updates the ranking and aggregate counters in one exclusive step,
//! then publishes a compact top-N delta on the update bus for the
//! broadcaster to fan out.

pub mod broadcaster;
pub mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{MatchError, Result};
use crate::protocol::{LeaderboardEntryPayload, LeaderboardUpdatePayload};
use crate::store::MatchStateStore;

pub const WINDOW_DAILY: &str = "daily";
pub const WINDOW_WEEKLY: &str = "weekly";
pub const WINDOW_MONTHLY: &str = "monthly";
pub const WINDOW_ALL_TIME: &str = "all_time";

/// Entries published per update on the bus
const PUBLISH_TOP: usize = 10;

/// Private-room boards age out a week after the last write
const PRIVATE_ROOM_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub fn default_windows() -> [&'static str; 4] {
    [WINDOW_DAILY, WINDOW_WEEKLY, WINDOW_MONTHLY, WINDOW_ALL_TIME]
}

pub fn is_known_window(window: &str) -> bool {
    default_windows().contains(&window)
}

/// Time-bounded windows expire so stale entries age out
fn window_ttl(window: &str) -> Option<Duration> {
    match window {
        WINDOW_DAILY => Some(Duration::from_secs(2 * 24 * 60 * 60)),
        WINDOW_WEEKLY => Some(Duration::from_secs(8 * 24 * 60 * 60)),
        WINDOW_MONTHLY => Some(Duration::from_secs(32 * 24 * 60 * 60)),
        _ => None,
    }
}

/// Data required to fold one finalized result into the aggregates
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub user_id: Uuid,
    pub username: String,
    pub score: u32,
    pub correct_count: usize,
    pub question_count: usize,
    pub won: bool,
    pub match_id: Uuid,
    pub eligible: bool,
}

#[derive(Debug, Clone, Default)]
struct EntryMeta {
    username: String,
    wins: u64,
    games: u64,
    correct_total: u64,
    question_total: u64,
}

struct Board {
    scores: HashMap<Uuid, i64>,
    meta: HashMap<Uuid, EntryMeta>,
    expires_at: Option<Instant>,
}

impl Board {
    fn new() -> Self {
        Self {
            scores: HashMap::new(),
            meta: HashMap::new(),
            expires_at: None,
        }
    }

    fn live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }

    fn apply(&mut self, req: &RecordRequest, ttl: Option<Duration>) {
        *self.scores.entry(req.user_id).or_insert(0) += req.score as i64;
        let meta = self.meta.entry(req.user_id).or_default();
        meta.username = req.username.clone();
        meta.wins += u64::from(req.won);
        meta.games += 1;
        meta.correct_total += req.correct_count as u64;
        meta.question_total += req.question_count as u64;
        if let Some(ttl) = ttl {
            self.expires_at = Some(Instant::now() + ttl);
        }
    }

    fn top(&self, limit: usize) -> Vec<LeaderboardEntryPayload> {
        let mut ranked: Vec<(&Uuid, &i64)> = self.scores.iter().collect();
        // Highest score first; user id breaks ties deterministically
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (user_id, score))| {
                let meta = self.meta.get(user_id).cloned().unwrap_or_default();
                let accuracy = if meta.question_total > 0 {
                    meta.correct_total as f64 / meta.question_total as f64
                } else {
                    0.0
                };
                LeaderboardEntryPayload {
                    rank: i + 1,
                    user_id: user_id.to_string(),
                    username: meta.username,
                    score: *score,
                    wins: meta.wins,
                    games: meta.games,
                    accuracy,
                }
            })
            .collect()
    }
}

/// Windowed and room-scoped leaderboard state
pub struct LeaderboardService {
    boards: RwLock<HashMap<String, Board>>,
    store: Arc<MatchStateStore>,
    top_n: usize,
}

impl LeaderboardService {
    pub fn new(store: Arc<MatchStateStore>, top_n: usize) -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            store,
            top_n: if top_n == 0 { 50 } else { top_n },
        }
    }

    /// Fold a result into every window, then publish one compact update
    /// per touched window.
    pub async fn record_result(&self, req: RecordRequest) -> Result<()> {
        if !req.eligible {
            return Ok(());
        }

        let mut updates = Vec::with_capacity(default_windows().len());
        {
            let mut boards = self.boards.write().await;
            for window in default_windows() {
                let board = boards
                    .entry(window.to_string())
                    .and_modify(|b| {
                        if !b.live() {
                            *b = Board::new();
                        }
                    })
                    .or_insert_with(Board::new);
                board.apply(&req, window_ttl(window));
                updates.push(LeaderboardUpdatePayload {
                    window: window.to_string(),
                    top: board.top(PUBLISH_TOP),
                    match_id: Some(req.match_id.to_string()),
                });
            }
        }

        for update in updates {
            self.store.publish_update(update);
        }

        info!(user_id = %req.user_id, score = req.score, won = req.won, "leaderboard result recorded");
        Ok(())
    }

    /// Private-room results live on a parallel code-keyed board and
    /// never mix with the global windows.
    pub async fn record_private_room_result(
        &self,
        room_code: &str,
        req: RecordRequest,
    ) -> Result<()> {
        if !req.eligible {
            return Ok(());
        }

        let mut boards = self.boards.write().await;
        let board = boards
            .entry(private_key(room_code))
            .and_modify(|b| {
                if !b.live() {
                    *b = Board::new();
                }
            })
            .or_insert_with(Board::new);
        board.apply(&req, Some(PRIVATE_ROOM_TTL));
        Ok(())
    }

    /// Top N for a global window
    pub async fn top(&self, window: &str, limit: usize) -> Result<Vec<LeaderboardEntryPayload>> {
        if !is_known_window(window) {
            return Err(MatchError::UnknownWindow(format!(
                "unknown leaderboard window {}",
                window
            )));
        }
        let limit = if limit == 0 || limit > self.top_n {
            self.top_n
        } else {
            limit
        };
        let boards = self.boards.read().await;
        Ok(boards
            .get(window)
            .filter(|b| b.live())
            .map(|b| b.top(limit))
            .unwrap_or_default())
    }

    /// Top N for a private room board
    pub async fn private_room_top(
        &self,
        room_code: &str,
        limit: usize,
    ) -> Vec<LeaderboardEntryPayload> {
        let limit = if limit == 0 || limit > self.top_n {
            self.top_n
        } else {
            limit
        };
        let boards = self.boards.read().await;
        boards
            .get(&private_key(room_code))
            .filter(|b| b.live())
            .map(|b| b.top(limit))
            .unwrap_or_default()
    }
}

fn private_key(room_code: &str) -> String {
    format!("private_room:{}", room_code)
}
