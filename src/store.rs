//! Ephemeral per-match state behind leased locks
//!
//! Holds everything a live match needs that never touches durable
//! storage: the question pack (with server-only answers), per-player
//! answer logs, per-user recently-seen question ids, and the pub/sub
//! bus leaderboard updates fan out on. Records expire; a background
//! sweep drops what the TTLs have aged out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MatchError, Result};
use crate::model::{PlayerState, QuestionPackItem};
use crate::protocol::LeaderboardUpdatePayload;

/// Exclusive-lock lease per match
const LOCK_LEASE: Duration = Duration::from_secs(30);

/// Match records live well past completion for post-mortem lookups
const RECORD_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Recently-seen question ids per user
const HISTORY_TTL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// Logical channel name for leaderboard updates
pub const UPDATE_CHANNEL: &str = "lb:updates";

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

struct LockLease {
    token: Uuid,
    expires_at: Instant,
}

type LockTable = Arc<Mutex<HashMap<Uuid, LockLease>>>;

/// Guard returned by `lock_match`. Release checks that the lease still
/// belongs to the caller before deleting it, so an expired-and-reacquired
/// lock is never stolen back.
pub struct MatchLockGuard {
    locks: LockTable,
    match_id: Uuid,
    token: Uuid,
    released: bool,
}

impl MatchLockGuard {
    fn release_if_owned(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(mut table) = self.locks.lock() {
            if let Some(lease) = table.get(&self.match_id) {
                if lease.token == self.token {
                    table.remove(&self.match_id);
                }
            }
        }
    }

    /// Explicit release; dropping the guard has the same effect
    pub fn release(mut self) {
        self.release_if_owned();
    }
}

impl Drop for MatchLockGuard {
    fn drop(&mut self) {
        self.release_if_owned();
    }
}

/// Result of the batched two-player history lookup
#[derive(Debug, Clone)]
pub struct RecentCheck {
    /// Candidate ids neither player has seen
    pub unseen_by_both: Vec<String>,
    pub duplicates_first: usize,
    pub duplicates_second: usize,
}

impl RecentCheck {
    pub fn max_duplicates(&self) -> usize {
        self.duplicates_first.max(self.duplicates_second)
    }
}

/// In-process ephemeral store for live match state
pub struct MatchStateStore {
    locks: LockTable,
    questions: RwLock<HashMap<Uuid, Expiring<Vec<QuestionPackItem>>>>,
    players: RwLock<HashMap<Uuid, Expiring<HashMap<Uuid, PlayerState>>>>,
    history: RwLock<HashMap<Uuid, Expiring<HashSet<String>>>>,
    updates: broadcast::Sender<LeaderboardUpdatePayload>,
}

impl MatchStateStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            questions: RwLock::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Acquire the exclusive per-match lock with a 30 s lease. Callers
    /// that lose the race get a retryable error rather than queueing.
    pub fn lock_match(&self, match_id: Uuid) -> Result<MatchLockGuard> {
        let token = Uuid::new_v4();
        let mut table = self
            .locks
            .lock()
            .map_err(|_| MatchError::internal("lock table poisoned"))?;

        let now = Instant::now();
        match table.get(&match_id) {
            Some(lease) if lease.expires_at > now => {
                return Err(MatchError::LockHeld(format!(
                    "match {} is locked by another operation",
                    match_id
                )));
            }
            _ => {
                table.insert(
                    match_id,
                    LockLease {
                        token,
                        expires_at: now + LOCK_LEASE,
                    },
                );
            }
        }

        Ok(MatchLockGuard {
            locks: Arc::clone(&self.locks),
            match_id,
            token,
            released: false,
        })
    }

    /// Cache the question pack, server-only answers included
    pub async fn store_match_questions(&self, match_id: Uuid, items: Vec<QuestionPackItem>) {
        let mut questions = self.questions.write().await;
        questions.insert(match_id, Expiring::new(items, RECORD_TTL));
    }

    /// Lock-free snapshot of the pack
    pub async fn match_questions(&self, match_id: Uuid) -> Option<Vec<QuestionPackItem>> {
        let questions = self.questions.read().await;
        questions
            .get(&match_id)
            .filter(|e| e.live())
            .map(|e| e.value.clone())
    }

    /// Save a player's current answers and status
    pub async fn store_player_state(&self, state: PlayerState) {
        let mut players = self.players.write().await;
        let entry = players
            .entry(state.match_id)
            .or_insert_with(|| Expiring::new(HashMap::new(), RECORD_TTL));
        entry.expires_at = Instant::now() + RECORD_TTL;
        entry.value.insert(state.user_id, state);
    }

    pub async fn player_state(&self, match_id: Uuid, user_id: Uuid) -> Option<PlayerState> {
        let players = self.players.read().await;
        players
            .get(&match_id)
            .filter(|e| e.live())
            .and_then(|e| e.value.get(&user_id).cloned())
    }

    /// All participants of a match, ordered by join time for stable output
    pub async fn all_player_states(&self, match_id: Uuid) -> Vec<PlayerState> {
        let players = self.players.read().await;
        let mut states: Vec<PlayerState> = players
            .get(&match_id)
            .filter(|e| e.live())
            .map(|e| e.value.values().cloned().collect())
            .unwrap_or_default();
        states.sort_by_key(|s| (s.joined_at, s.user_id));
        states
    }

    /// Record question ids a user has now seen (10-day expiry)
    pub async fn add_recent_questions(&self, user_id: Uuid, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let mut history = self.history.write().await;
        let entry = history
            .entry(user_id)
            .or_insert_with(|| Expiring::new(HashSet::new(), HISTORY_TTL));
        if !entry.live() {
            entry.value.clear();
        }
        entry.expires_at = Instant::now() + HISTORY_TTL;
        entry.value.extend(ids.iter().cloned());
    }

    /// Check candidate ids against both players' histories in one call,
    /// the in-process equivalent of a single batched round trip.
    pub async fn check_recent_for_pair(
        &self,
        first: Uuid,
        second: Uuid,
        ids: &[String],
    ) -> RecentCheck {
        let history = self.history.read().await;
        let seen_first = history.get(&first).filter(|e| e.live()).map(|e| &e.value);
        let seen_second = history.get(&second).filter(|e| e.live()).map(|e| &e.value);

        let mut check = RecentCheck {
            unseen_by_both: Vec::with_capacity(ids.len()),
            duplicates_first: 0,
            duplicates_second: 0,
        };

        for id in ids {
            let in_first = seen_first.map(|s| s.contains(id)).unwrap_or(false);
            let in_second = seen_second.map(|s| s.contains(id)).unwrap_or(false);
            if in_first {
                check.duplicates_first += 1;
            }
            if in_second {
                check.duplicates_second += 1;
            }
            if !in_first && !in_second {
                check.unseen_by_both.push(id.clone());
            }
        }

        check
    }

    /// Membership probe for a single user's history
    pub async fn recent_contains(&self, user_id: Uuid, id: &str) -> bool {
        let history = self.history.read().await;
        history
            .get(&user_id)
            .filter(|e| e.live())
            .map(|e| e.value.contains(id))
            .unwrap_or(false)
    }

    /// Publish a leaderboard update on the bus. Lossy by design: with
    /// no subscriber the update is dropped.
    pub fn publish_update(&self, update: LeaderboardUpdatePayload) {
        let receivers = self.updates.receiver_count();
        if receivers == 0 {
            debug!(channel = UPDATE_CHANNEL, "no subscribers for leaderboard update");
            return;
        }
        let _ = self.updates.send(update);
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<LeaderboardUpdatePayload> {
        self.updates.subscribe()
    }

    /// Drop expired records and stale lock leases
    pub async fn sweep(&self) {
        {
            let mut questions = self.questions.write().await;
            questions.retain(|_, e| e.live());
        }
        {
            let mut players = self.players.write().await;
            players.retain(|_, e| e.live());
        }
        {
            let mut history = self.history.write().await;
            history.retain(|_, e| e.live());
        }
        if let Ok(mut table) = self.locks.lock() {
            let now = Instant::now();
            table.retain(|_, lease| lease.expires_at > now);
        }
    }
}

impl Default for MatchStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlayerState;

    #[test]
    fn test_lock_is_exclusive() {
        let store = MatchStateStore::new();
        let match_id = Uuid::new_v4();

        let guard = store.lock_match(match_id).unwrap();
        let second = store.lock_match(match_id);
        assert!(matches!(second, Err(MatchError::LockHeld(_))));

        guard.release();
        assert!(store.lock_match(match_id).is_ok());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let store = MatchStateStore::new();
        let match_id = Uuid::new_v4();
        {
            let _guard = store.lock_match(match_id).unwrap();
        }
        assert!(store.lock_match(match_id).is_ok());
    }

    #[test]
    fn test_independent_matches_do_not_contend() {
        let store = MatchStateStore::new();
        let _a = store.lock_match(Uuid::new_v4()).unwrap();
        let _b = store.lock_match(Uuid::new_v4()).unwrap();
    }

    #[tokio::test]
    async fn test_player_state_roundtrip() {
        let store = MatchStateStore::new();
        let match_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        assert!(store.player_state(match_id, user_id).await.is_none());

        let state = PlayerState::new(match_id, user_id, "alice".into(), false, 1);
        store.store_player_state(state).await;

        let loaded = store.player_state(match_id, user_id).await.unwrap();
        assert_eq!(loaded.username, "alice");

        let all = store.all_player_states(match_id).await;
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_all_player_states_ordered_by_join() {
        let store = MatchStateStore::new();
        let match_id = Uuid::new_v4();

        let mut second = PlayerState::new(match_id, Uuid::new_v4(), "b".into(), false, 20);
        second.joined_at = 20;
        let mut first = PlayerState::new(match_id, Uuid::new_v4(), "a".into(), false, 10);
        first.joined_at = 10;

        store.store_player_state(second).await;
        store.store_player_state(first).await;

        let all = store.all_player_states(match_id).await;
        assert_eq!(all[0].username, "a");
        assert_eq!(all[1].username, "b");
    }

    #[tokio::test]
    async fn test_recent_history_pair_check() {
        let store = MatchStateStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store
            .add_recent_questions(alice, &["q1".into(), "q2".into()])
            .await;
        store.add_recent_questions(bob, &["q2".into(), "q3".into()]).await;

        let ids: Vec<String> = vec!["q1".into(), "q2".into(), "q3".into(), "q4".into()];
        let check = store.check_recent_for_pair(alice, bob, &ids).await;

        assert_eq!(check.duplicates_first, 2);
        assert_eq!(check.duplicates_second, 2);
        assert_eq!(check.max_duplicates(), 2);
        assert_eq!(check.unseen_by_both, vec!["q4".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_lossy() {
        let store = MatchStateStore::new();
        store.publish_update(LeaderboardUpdatePayload {
            window: "daily".into(),
            top: vec![],
            match_id: None,
        });

        let mut rx = store.subscribe_updates();
        store.publish_update(LeaderboardUpdatePayload {
            window: "weekly".into(),
            top: vec![],
            match_id: None,
        });
        let got = rx.try_recv().unwrap();
        assert_eq!(got.window, "weekly");
    }
}
