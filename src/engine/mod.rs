//! Match orchestration: lifecycle, answer validation, finalization
//!
//! Every mutation of one match is serialized by the state store's named
//! lock. Durable rows are written before completion is broadcast, so
//! the repository always holds the authoritative final state once
//! clients hear about it.

pub mod handler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::current_timestamp;
use crate::error::{MatchError, Result};
use crate::leaderboard::{LeaderboardService, RecordRequest};
use crate::model::{
    AnswerRecord, Match, MatchMode, MatchStatus, PlayerState, PlayerStatus, QuestionPackItem,
    Score,
};
use crate::protocol::{MatchCompletePayload, MatchResultPayload, PlayerProgress, ProgressUpdatePayload};
use crate::queue::MatchPair;
use crate::questions::{normalize_text, Difficulty, PackRequest};
use crate::questions::assembler::PackAssembler;
use crate::rooms::RoomPlayer;
use crate::scoring::ScoringEngine;
use crate::storage::{MatchRepository, PlayerResultRow};
use crate::store::{MatchLockGuard, MatchStateStore};

/// Quick bounded retry for the per-match lock so two near-simultaneous
/// operations serialize instead of one failing spuriously. Callers past
/// this budget get the retryable error.
const LOCK_ATTEMPTS: u32 = 8;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Why a finalization is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeCause {
    Completed,
    Timeout,
}

/// Result of an accepted answer submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitOutcome {
    pub question_order: usize,
    pub is_correct: bool,
    pub score: Score,
    /// True once every participant has a full answer log
    pub match_complete: bool,
    pub received_at: u64,
}

/// Drives match lifecycle in response to protocol events
pub struct MatchService {
    repo: Arc<dyn MatchRepository>,
    assembler: Arc<PackAssembler>,
    store: Arc<MatchStateStore>,
    leaderboard: Arc<LeaderboardService>,
    scoring: ScoringEngine,
    runtime: RuntimeConfig,
}

impl MatchService {
    pub fn new(
        repo: Arc<dyn MatchRepository>,
        assembler: Arc<PackAssembler>,
        store: Arc<MatchStateStore>,
        leaderboard: Arc<LeaderboardService>,
        scoring: ScoringEngine,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            repo,
            assembler,
            store,
            leaderboard,
            scoring,
            runtime,
        }
    }

    pub fn store(&self) -> &Arc<MatchStateStore> {
        &self.store
    }

    /// Create a 1v1 match from a queue pairing. Returns the pending
    /// match and its pack; the caller dispatches protocol messages and
    /// then activates.
    pub async fn create_random_match(
        &self,
        pair: &MatchPair,
        question_count: usize,
        per_question_seconds: u64,
        category: Option<String>,
    ) -> Result<(Match, Vec<QuestionPackItem>)> {
        let match_id = Uuid::new_v4();
        let seed_hash = format!("{}-{}", match_id, current_timestamp() / 1000);
        let leaderboard_eligible = !pair.first.is_guest && !pair.second.is_guest;

        let m = self
            .insert_match_row(
                match_id,
                MatchMode::Random1v1,
                question_count,
                per_question_seconds,
                seed_hash.clone(),
                leaderboard_eligible,
                pair.first.user_id,
                None,
            )
            .await?;

        let req = PackRequest {
            category: category.unwrap_or_else(|| "general".to_string()),
            difficulty_counts: random_1v1_distribution(question_count),
            total_questions: question_count,
            seed: seed_hash,
            user_ids: vec![pair.first.user_id, pair.second.user_id],
            match_mode: MatchMode::Random1v1,
        };
        let pack = self.assembler.assemble(&req).await?;
        self.store.store_match_questions(match_id, pack.clone()).await;

        let now = current_timestamp();
        for player in [&pair.first, &pair.second] {
            self.init_player(match_id, player.user_id, &player.username, player.is_guest, now)
                .await;
        }

        info!(match_id = %match_id, mode = "random_1v1", questions = pack.len(), "match created");
        Ok((m, pack))
    }

    /// Create a match for a private room once its second player arrived
    pub async fn create_private_match(
        &self,
        room_code: &str,
        players: &[RoomPlayer],
        question_count: usize,
        per_question_seconds: u64,
        category: Option<String>,
    ) -> Result<(Match, Vec<QuestionPackItem>)> {
        let host_id = players
            .first()
            .map(|p| p.user_id)
            .ok_or_else(|| MatchError::NeedTwoPlayers("room has no players".to_string()))?;

        let match_id = Uuid::new_v4();
        let seed_hash = format!("{}-{}", match_id, current_timestamp() / 1000);

        let m = self
            .insert_match_row(
                match_id,
                MatchMode::PrivateRoom,
                question_count,
                per_question_seconds,
                seed_hash.clone(),
                true,
                host_id,
                Some(room_code.to_string()),
            )
            .await?;

        let req = PackRequest {
            category: category.unwrap_or_else(|| "general".to_string()),
            difficulty_counts: private_room_distribution(question_count),
            total_questions: question_count,
            seed: seed_hash,
            user_ids: Vec::new(),
            match_mode: MatchMode::PrivateRoom,
        };
        let pack = self.assembler.assemble(&req).await?;
        self.store.store_match_questions(match_id, pack.clone()).await;

        let now = current_timestamp();
        for player in players {
            self.init_player(match_id, player.user_id, &player.username, player.is_guest, now)
                .await;
        }

        info!(match_id = %match_id, room_code = %room_code, questions = pack.len(), "private match created");
        Ok((m, pack))
    }

    /// Mark the match active once its pack is dispatched
    pub async fn activate_match(&self, match_id: Uuid) -> Result<()> {
        let guard = self.lock_with_retry(match_id).await?;
        self.repo
            .update_status(match_id, MatchStatus::Active, Some(current_timestamp()), None)
            .await?;
        for mut state in self.store.all_player_states(match_id).await {
            state.status = PlayerStatus::Active;
            self.store.store_player_state(state).await;
        }
        guard.release();
        Ok(())
    }

    /// Validate and score one answer under the match lock
    pub async fn submit_answer(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        question_token: &str,
        answer: &str,
        submitted_at: u64,
    ) -> Result<SubmitOutcome> {
        let guard = self.lock_with_retry(match_id).await?;
        let outcome = self
            .submit_answer_locked(match_id, user_id, question_token, answer, submitted_at)
            .await;
        guard.release();
        outcome
    }

    async fn submit_answer_locked(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        question_token: &str,
        answer: &str,
        submitted_at: u64,
    ) -> Result<SubmitOutcome> {
        let mut state = self
            .store
            .player_state(match_id, user_id)
            .await
            .ok_or_else(|| {
                MatchError::PlayerStateNotFound(format!(
                    "no state for user {} in match {}",
                    user_id, match_id
                ))
            })?;

        let questions = self
            .store
            .match_questions(match_id)
            .await
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                MatchError::MatchNotFound(format!("no questions for match {}", match_id))
            })?;

        let item = questions
            .iter()
            .find(|q| q.token == question_token)
            .ok_or_else(|| {
                MatchError::InvalidQuestionToken("question token not in this match".to_string())
            })?;

        if state.has_answered(item.order) {
            return Err(MatchError::QuestionAlreadyAnswered(format!(
                "question {} already answered",
                item.order
            )));
        }

        let summary = self.repo.summary(match_id).await?;
        let timeout_ms = summary.per_question_seconds * 1000;

        let is_correct = normalize_text(answer) == item.correct_answer;
        let streak = state.trailing_streak() + usize::from(is_correct);

        let now = current_timestamp();
        let elapsed = now.saturating_sub(submitted_at);
        let time_remaining_ms = timeout_ms.saturating_sub(elapsed);

        let score = self
            .scoring
            .score_answer(is_correct, time_remaining_ms, timeout_ms, streak);

        state.answers.push(AnswerRecord {
            question_order: item.order,
            question_token: question_token.to_string(),
            answer: answer.to_string(),
            submitted_at,
            time_remaining_ms,
            is_correct,
            score_earned: score,
        });
        let question_order = item.order;
        self.store.store_player_state(state).await;

        let match_complete = self
            .store
            .all_player_states(match_id)
            .await
            .iter()
            .all(|s| s.answers.len() >= questions.len());

        info!(
            match_id = %match_id,
            user_id = %user_id,
            question_order,
            correct = is_correct,
            score,
            "answer submitted"
        );

        Ok(SubmitOutcome {
            question_order,
            is_correct,
            score,
            match_complete,
            received_at: now,
        })
    }

    /// Finalize under the lock: fill the answer logs to N, compute
    /// totals, persist, and feed the leaderboard. Idempotent; a second
    /// call on a terminal match returns None.
    pub async fn finalize_match(
        &self,
        match_id: Uuid,
        cause: FinalizeCause,
    ) -> Result<Option<MatchCompletePayload>> {
        let guard = self.lock_with_retry(match_id).await?;
        let result = self.finalize_match_locked(match_id, cause).await;
        guard.release();
        result
    }

    async fn finalize_match_locked(
        &self,
        match_id: Uuid,
        cause: FinalizeCause,
    ) -> Result<Option<MatchCompletePayload>> {
        let summary = self.repo.summary(match_id).await?;
        if summary.status.is_terminal() {
            return Ok(None);
        }

        let questions = self
            .store
            .match_questions(match_id)
            .await
            .unwrap_or_default();
        let timeout_ms = summary.per_question_seconds * 1000;
        let total_questions = summary.question_count;

        let mut states = self.store.all_player_states(match_id).await;
        let mut record_reqs: Vec<RecordRequest> = Vec::new();
        let mut results: Vec<MatchResultPayload> = Vec::new();

        for state in &mut states {
            let answered_before = state.answers.len();
            for q in &questions {
                if !state.has_answered(q.order) {
                    state.answers.push(AnswerRecord {
                        question_order: q.order,
                        question_token: q.token.clone(),
                        answer: String::new(),
                        submitted_at: current_timestamp(),
                        time_remaining_ms: 0,
                        is_correct: false,
                        score_earned: 0,
                    });
                }
            }

            let final_score = self.scoring.compute_final(&state.answers, timeout_ms);
            let correct_count = state.answers.iter().filter(|a| a.is_correct).count();

            state.final_score = Some(final_score.total);
            state.accuracy = Some(final_score.accuracy);
            state.streak_bonus_pct = Some(final_score.streak_bonus_pct);
            state.status = if state.left_at.is_some() {
                PlayerStatus::LeftEarly
            } else if cause == FinalizeCause::Timeout && answered_before < total_questions {
                PlayerStatus::Timeout
            } else {
                PlayerStatus::Completed
            };

            let row = PlayerResultRow {
                match_id,
                user_id: state.user_id,
                final_score: final_score.total,
                accuracy: final_score.accuracy,
                streak_bonus_pct: final_score.streak_bonus_pct,
                status: state.status,
                left_at: state.left_at,
                answers: serde_json::to_value(&state.answers)?,
            };
            if let Err(e) = self.repo.finalize_player(row).await {
                warn!(user_id = %state.user_id, error = %e, "failed to persist player result");
            }
            self.store.store_player_state(state.clone()).await;

            // Guests never reach the global windows, but private-room
            // boards rank every participant of the room.
            let board_eligible = summary.leaderboard_eligible
                && (!state.is_guest || summary.mode == MatchMode::PrivateRoom);
            if board_eligible {
                record_reqs.push(RecordRequest {
                    user_id: state.user_id,
                    username: state.username.clone(),
                    score: final_score.total,
                    correct_count,
                    question_count: total_questions,
                    won: false,
                    match_id,
                    eligible: true,
                });
            }

            results.push(MatchResultPayload {
                user_id: state.user_id.to_string(),
                username: state.username.clone(),
                final_score: final_score.total,
                accuracy: final_score.accuracy,
                streak_bonus_applied: final_score.streak_bonus_pct,
                status: state.status.as_str().to_string(),
            });
        }

        let final_status = match cause {
            FinalizeCause::Completed => MatchStatus::Completed,
            FinalizeCause::Timeout => MatchStatus::Timeout,
        };
        self.repo
            .update_status(match_id, final_status, None, Some(current_timestamp()))
            .await?;

        if !record_reqs.is_empty() {
            let highest = record_reqs.iter().map(|r| r.score).max().unwrap_or(0);
            for mut req in record_reqs {
                req.won = req.score == highest;
                let outcome = match (&summary.mode, &summary.room_code) {
                    (MatchMode::PrivateRoom, Some(code)) => {
                        self.leaderboard.record_private_room_result(code, req).await
                    }
                    (MatchMode::Random1v1, _) => self.leaderboard.record_result(req).await,
                    _ => Ok(()),
                };
                if let Err(e) = outcome {
                    warn!(match_id = %match_id, error = %e, "failed to record leaderboard result");
                }
            }
        }

        info!(
            match_id = %match_id,
            status = final_status.as_str(),
            players = results.len(),
            "match finalized"
        );

        Ok(Some(MatchCompletePayload {
            match_id: match_id.to_string(),
            results,
            leaderboard_eligible: summary.leaderboard_eligible,
        }))
    }

    /// Stamp a player's departure; classification happens at finalization
    pub async fn mark_left(&self, match_id: Uuid, user_id: Uuid) -> Result<()> {
        let guard = self.lock_with_retry(match_id).await?;
        if let Some(mut state) = self.store.player_state(match_id, user_id).await {
            if state.left_at.is_none() {
                state.left_at = Some(current_timestamp());
                self.store.store_player_state(state).await;
            }
        }
        guard.release();
        Ok(())
    }

    /// Lock-free progress snapshot
    pub async fn progress(&self, match_id: Uuid) -> Result<ProgressUpdatePayload> {
        let questions = self
            .store
            .match_questions(match_id)
            .await
            .ok_or_else(|| MatchError::MatchNotFound(format!("match {} not found", match_id)))?;
        let total = questions.len();

        let players = self
            .store
            .all_player_states(match_id)
            .await
            .into_iter()
            .map(|s| PlayerProgress {
                user_id: s.user_id.to_string(),
                answered: s.answers.len(),
                pending: total.saturating_sub(s.answers.len()),
                status: s.status.as_str().to_string(),
            })
            .collect();

        Ok(ProgressUpdatePayload {
            match_id: match_id.to_string(),
            players,
        })
    }

    pub fn global_timeout(&self, question_count: usize, per_question_seconds: u64) -> u64 {
        question_count as u64 * per_question_seconds + self.runtime.global_timeout_padding_seconds
    }

    async fn lock_with_retry(&self, match_id: Uuid) -> Result<MatchLockGuard> {
        let mut attempt = 0;
        loop {
            match self.store.lock_match(match_id) {
                Ok(guard) => return Ok(guard),
                Err(MatchError::LockHeld(msg)) => {
                    attempt += 1;
                    if attempt >= LOCK_ATTEMPTS {
                        return Err(MatchError::LockHeld(msg));
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_match_row(
        &self,
        match_id: Uuid,
        mode: MatchMode,
        question_count: usize,
        per_question_seconds: u64,
        seed_hash: String,
        leaderboard_eligible: bool,
        created_by: Uuid,
        room_code: Option<String>,
    ) -> Result<Match> {
        let m = Match {
            id: match_id,
            mode,
            question_count,
            per_question_seconds,
            global_timeout_seconds: self.global_timeout(question_count, per_question_seconds),
            seed_hash,
            leaderboard_eligible,
            status: MatchStatus::Pending,
            created_by,
            room_code,
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
        };
        self.repo.insert_match(&m).await?;
        Ok(m)
    }

    async fn init_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        username: &str,
        is_guest: bool,
        now: u64,
    ) {
        let state = PlayerState::new(match_id, user_id, username.to_string(), is_guest, now);
        self.store.store_player_state(state).await;
        if let Err(e) = self.repo.upsert_player_initial(match_id, user_id, is_guest).await {
            warn!(user_id = %user_id, error = %e, "failed to persist initial player state");
        }
    }
}

/// Fixed easy/medium/hard split for random 1v1 matches
fn random_1v1_distribution(question_count: usize) -> HashMap<Difficulty, usize> {
    let (easy, medium, hard) = match question_count {
        5 => (2, 2, 1),
        15 => (7, 5, 3),
        _ => (4, 3, 3),
    };
    distribution(easy, medium, hard)
}

/// Split used by the AI generator defaults for private rooms
fn private_room_distribution(question_count: usize) -> HashMap<Difficulty, usize> {
    let (easy, medium, hard) = match question_count {
        5 => (2, 2, 1),
        15 => (7, 5, 3),
        _ => (5, 3, 2),
    };
    distribution(easy, medium, hard)
}

fn distribution(easy: usize, medium: usize, hard: usize) -> HashMap<Difficulty, usize> {
    let mut counts = HashMap::new();
    counts.insert(Difficulty::Easy, easy);
    counts.insert(Difficulty::Medium, medium);
    counts.insert(Difficulty::Hard, hard);
    counts
}
