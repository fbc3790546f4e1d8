//! Protocol dispatch for match-related messages
//!
//! The handler is the only component holding both the hub and the
//! orchestrator, which keeps the composition acyclic: the hub knows
//! nothing about matches, the service knows nothing about connections.
//! It also owns the per-match deadline tasks that force finalization
//! when the global timeout expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::config::RuntimeConfig;
use crate::current_timestamp;
use crate::engine::{FinalizeCause, MatchService};
use crate::error::{MatchError, Result};
use crate::hub::Hub;
use crate::model::{Match, QuestionPackItem};
use crate::protocol::*;
use crate::queue::{MatchPair, MatchmakingQueue, MatchmakingRequest};
use crate::rooms::{PrivateRoom, RoomManager};

const VALID_QUESTION_COUNTS: [usize; 3] = [5, 10, 15];

/// Routes envelopes to the queue, rooms, and orchestrator, and pushes
/// replies through the hub
pub struct MatchHandler {
    service: Arc<MatchService>,
    hub: Arc<Hub>,
    queue: Arc<MatchmakingQueue>,
    rooms: Arc<RoomManager>,
    runtime: RuntimeConfig,
    deadlines: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl MatchHandler {
    pub fn new(
        service: Arc<MatchService>,
        hub: Arc<Hub>,
        queue: Arc<MatchmakingQueue>,
        rooms: Arc<RoomManager>,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            service,
            hub,
            queue,
            rooms,
            runtime,
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Entry point for every inbound envelope. Errors are surfaced to
    /// the originator as `error` frames and never tear down the
    /// connection.
    pub async fn handle_message(self: &Arc<Self>, claims: &Claims, env: Envelope) {
        let result = match env.kind.as_str() {
            TYPE_JOIN_QUEUE => self.handle_join_queue(claims, &env).await,
            TYPE_CANCEL_QUEUE => self.handle_cancel_queue(claims, &env).await,
            TYPE_ACCEPT_BOT_FILL => Err(MatchError::FeatureNotAvailable(
                "bot opponents are not available yet".to_string(),
            )),
            TYPE_JOIN_PRIVATE => self.handle_join_private(claims, &env).await,
            TYPE_READY_STATE => Err(MatchError::FeatureNotAvailable(
                "ready state is not available yet".to_string(),
            )),
            TYPE_SUBMIT_ANSWER => self.handle_submit_answer(claims, &env).await,
            TYPE_LEAVE_MATCH => self.handle_leave_match(claims, &env).await,
            TYPE_REQUEST_PROGRESS => self.handle_request_progress(claims, &env).await,
            TYPE_PING => self.handle_ping(claims, &env).await,
            TYPE_PONG => Ok(()),
            other => Err(MatchError::UnknownMessageType(format!(
                "unknown message type: {}",
                other
            ))),
        };

        if let Err(e) = result {
            self.send_error(claims.user_id, &e).await;
        }
    }

    async fn handle_ping(&self, claims: &Claims, env: &Envelope) -> Result<()> {
        let ping: PingPayload = env.parse().unwrap_or(PingPayload { timestamp: 0 });
        let pong = Envelope::new(
            TYPE_PONG,
            &PongPayload {
                timestamp: if ping.timestamp != 0 {
                    ping.timestamp
                } else {
                    current_timestamp()
                },
            },
        )?;
        self.hub.send_to_user(claims.user_id, pong).await
    }

    async fn handle_join_queue(self: &Arc<Self>, claims: &Claims, env: &Envelope) -> Result<()> {
        let req: JoinQueuePayload = env.parse()?;

        let question_count = req
            .question_count
            .filter(|c| VALID_QUESTION_COUNTS.contains(c))
            .unwrap_or(self.runtime.default_question_count);
        let category = req.category.clone();

        let (queue_token, pair) = self
            .queue
            .enqueue(MatchmakingRequest {
                user_id: claims.user_id,
                username: claims.username.clone(),
                is_guest: claims.is_guest,
                preferred_category: category.clone(),
                preferred_difficulty: req.preferred_difficulty.clone(),
                bot_ok: req.bot_ok.unwrap_or(true),
            })
            .await;

        if let Some(pair) = pair {
            return self.start_random_match(pair, question_count, category).await;
        }

        let update = Envelope::new(
            TYPE_QUEUE_UPDATE,
            &QueueUpdatePayload {
                queue_token: queue_token.to_string(),
                status: "waiting".to_string(),
                position: self.queue.position(queue_token).await,
                wait_seconds: 0,
            },
        )?;
        self.hub.send_to_user(claims.user_id, update).await
    }

    async fn handle_cancel_queue(&self, claims: &Claims, env: &Envelope) -> Result<()> {
        let req: CancelQueuePayload = env.parse()?;
        let token = Uuid::parse_str(&req.queue_token)
            .map_err(|_| MatchError::invalid_payload("malformed queue token"))?;

        self.queue.dequeue(token).await?;

        let update = Envelope::new(
            TYPE_QUEUE_UPDATE,
            &QueueUpdatePayload {
                queue_token: req.queue_token,
                status: "cancelled".to_string(),
                position: -1,
                wait_seconds: 0,
            },
        )?;
        self.hub.send_to_user(claims.user_id, update).await
    }

    async fn handle_join_private(self: &Arc<Self>, claims: &Claims, env: &Envelope) -> Result<()> {
        let req: JoinPrivatePayload = env.parse()?;

        let room = self
            .rooms
            .join_room(&req.room_code, claims.user_id, claims.username.clone(), claims.is_guest)
            .await?;

        // Second player landing starts the match
        let room = if room.players.len() >= 2 && room.match_id.is_none() {
            self.start_private_match(&room).await?
        } else {
            room
        };

        let players = room
            .players
            .iter()
            .map(|p| PlayerInfo {
                user_id: p.user_id.to_string(),
                username: p.username.clone(),
            })
            .collect();
        let update = Envelope::new(
            TYPE_PRIVATE_ROOM_UPDATE,
            &PrivateRoomUpdatePayload {
                match_id: room.match_id.map(|id| id.to_string()),
                room_code: room.room_code.clone(),
                players,
                slots_remaining: room.slots_remaining(),
            },
        )?;
        self.hub.send_to_user(claims.user_id, update).await
    }

    async fn handle_submit_answer(self: &Arc<Self>, claims: &Claims, env: &Envelope) -> Result<()> {
        let req: SubmitAnswerPayload = env.parse()?;
        let match_id = Uuid::parse_str(&req.match_id)
            .map_err(|_| MatchError::invalid_payload("malformed match id"))?;

        let outcome = self
            .service
            .submit_answer(
                match_id,
                claims.user_id,
                &req.question_token,
                &req.answer,
                current_timestamp(),
            )
            .await?;

        let ack = Envelope::new(
            TYPE_ANSWER_ACK,
            &AnswerAckPayload {
                match_id: req.match_id,
                question_order: outcome.question_order,
                accepted: true,
                server_received_at: outcome.received_at,
            },
        )?;
        if let Err(e) = self.hub.send_to_user(claims.user_id, ack).await {
            warn!(user_id = %claims.user_id, error = %e, "failed to send answer ack");
        }

        if outcome.match_complete {
            self.finalize_and_broadcast(match_id, FinalizeCause::Completed)
                .await?;
        }
        Ok(())
    }

    async fn handle_leave_match(&self, claims: &Claims, env: &Envelope) -> Result<()> {
        let req: LeaveMatchPayload = env.parse()?;
        let match_id = Uuid::parse_str(&req.match_id)
            .map_err(|_| MatchError::invalid_payload("malformed match id"))?;

        self.hub.leave_match(match_id, claims.user_id).await;
        self.service.mark_left(match_id, claims.user_id).await
    }

    async fn handle_request_progress(&self, claims: &Claims, env: &Envelope) -> Result<()> {
        let req: RequestProgressPayload = env.parse()?;
        let match_id = Uuid::parse_str(&req.match_id)
            .map_err(|_| MatchError::invalid_payload("malformed match id"))?;

        let progress = self.service.progress(match_id).await?;
        let update = Envelope::new(TYPE_PROGRESS_UPDATE, &progress)?;
        self.hub.send_to_user(claims.user_id, update).await
    }

    /// Pairing succeeded: create the match, announce it, dispatch the
    /// pack, and arm the deadline.
    async fn start_random_match(
        self: &Arc<Self>,
        pair: MatchPair,
        question_count: usize,
        category: Option<String>,
    ) -> Result<()> {
        let (m, pack) = self
            .service
            .create_random_match(
                &pair,
                question_count,
                self.runtime.default_per_question_seconds,
                category,
            )
            .await?;

        self.hub.join_match(m.id, pair.first.user_id).await;
        self.hub.join_match(m.id, pair.second.user_id).await;

        let found = Envelope::new(
            TYPE_MATCH_FOUND,
            &MatchFoundPayload {
                match_id: m.id.to_string(),
                mode: m.mode.as_str().to_string(),
                players: vec![
                    PlayerInfo {
                        user_id: pair.first.user_id.to_string(),
                        username: pair.first.username.clone(),
                    },
                    PlayerInfo {
                        user_id: pair.second.user_id.to_string(),
                        username: pair.second.username.clone(),
                    },
                ],
                question_count: m.question_count,
                per_question_seconds: m.per_question_seconds,
                global_timeout_seconds: m.global_timeout_seconds,
            },
        )?;
        if let Err(e) = self.hub.broadcast_to_match(m.id, found).await {
            warn!(match_id = %m.id, error = %e, "match_found broadcast incomplete");
        }

        self.dispatch_questions(&m, &pack).await?;
        self.arm_deadline(m.id, m.global_timeout_seconds).await;
        Ok(())
    }

    /// Second player joined a private room: create the match, run the
    /// countdown, then dispatch the pack.
    async fn start_private_match(self: &Arc<Self>, room: &PrivateRoom) -> Result<PrivateRoom> {
        let (m, pack) = self
            .service
            .create_private_match(
                &room.room_code,
                &room.players,
                room.question_count,
                room.per_question_seconds,
                room.category.clone(),
            )
            .await?;

        let started = self
            .rooms
            .start_room(&room.room_code, m.id, room.start_countdown_seconds)
            .await?;

        for player in &started.players {
            self.hub.join_match(m.id, player.user_id).await;
        }

        // Countdown and dispatch run off this task so the join reply
        // returns immediately
        let handler = Arc::clone(self);
        let room_code = started.room_code.clone();
        let countdown = started.start_countdown_seconds;
        tokio::spawn(async move {
            handler
                .run_start_sequence(m, pack, room_code, countdown)
                .await;
        });

        Ok(started)
    }

    async fn run_start_sequence(
        self: &Arc<Self>,
        m: Match,
        pack: Vec<QuestionPackItem>,
        room_code: String,
        countdown: u64,
    ) {
        for seconds in (1..=countdown).rev() {
            let tick = Envelope::new(
                TYPE_COUNTDOWN,
                &CountdownPayload {
                    match_id: m.id.to_string(),
                    seconds,
                },
            );
            match tick {
                Ok(tick) => {
                    let _ = self.hub.broadcast_to_match(m.id, tick).await;
                }
                Err(e) => warn!(error = %e, "failed to encode countdown"),
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        if let Err(e) = self.dispatch_questions(&m, &pack).await {
            error!(match_id = %m.id, error = %e, "failed to dispatch private pack");
            return;
        }
        if let Err(e) = self.rooms.activate_room(&room_code).await {
            warn!(room_code = %room_code, error = %e, "failed to activate room");
        }
        self.arm_deadline(m.id, m.global_timeout_seconds).await;
    }

    /// Broadcast the pack and mark the match active
    async fn dispatch_questions(&self, m: &Match, pack: &[QuestionPackItem]) -> Result<()> {
        let batch: Vec<QuestionPayload> = pack
            .iter()
            .map(|q| QuestionPayload {
                order: q.order,
                id: q.id.clone(),
                prompt: q.prompt.clone(),
                options: q.options.clone(),
                token: q.token.clone(),
            })
            .collect();

        let env = Envelope::new(
            TYPE_QUESTION_BATCH,
            &QuestionBatchPayload {
                match_id: m.id.to_string(),
                batch,
                seed: m.seed_hash.clone(),
                issued_at: current_timestamp(),
            },
        )?;
        if let Err(e) = self.hub.broadcast_to_match(m.id, env).await {
            warn!(match_id = %m.id, error = %e, "question batch broadcast incomplete");
        }

        self.service.activate_match(m.id).await
    }

    /// Finalize and announce the outcome. On timeout the match_timeout
    /// frame precedes match_complete.
    pub async fn finalize_and_broadcast(
        self: &Arc<Self>,
        match_id: Uuid,
        cause: FinalizeCause,
    ) -> Result<()> {
        let Some(payload) = self.service.finalize_match(match_id, cause).await? else {
            return Ok(());
        };

        if cause == FinalizeCause::Timeout {
            let timeout = Envelope::new(
                TYPE_MATCH_TIMEOUT,
                &MatchTimeoutPayload {
                    match_id: match_id.to_string(),
                    reason: "global timeout expired".to_string(),
                },
            )?;
            let _ = self.hub.broadcast_to_match(match_id, timeout).await;
        }

        let complete = Envelope::new(TYPE_MATCH_COMPLETE, &payload)?;
        if let Err(e) = self.hub.broadcast_to_match(match_id, complete).await {
            warn!(match_id = %match_id, error = %e, "match_complete broadcast incomplete");
        }

        self.disarm_deadline(match_id).await;
        Ok(())
    }

    /// Arm the per-match deadline: on expiry the match is finalized
    /// with timeout status. Normal finalization disarms it.
    async fn arm_deadline(self: &Arc<Self>, match_id: Uuid, global_timeout_seconds: u64) {
        let handler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(global_timeout_seconds)).await;
            // Drop our own registration first so the finalize path does
            // not abort the task out from under itself
            handler.deadlines.lock().await.remove(&match_id);
            if let Err(e) = handler
                .finalize_and_broadcast(match_id, FinalizeCause::Timeout)
                .await
            {
                error!(match_id = %match_id, error = %e, "timeout finalization failed");
            }
        });

        let mut deadlines = self.deadlines.lock().await;
        if let Some(old) = deadlines.insert(match_id, handle) {
            old.abort();
        }
    }

    async fn disarm_deadline(&self, match_id: Uuid) {
        let mut deadlines = self.deadlines.lock().await;
        if let Some(handle) = deadlines.remove(&match_id) {
            handle.abort();
        }
    }

    async fn send_error(&self, user_id: Uuid, err: &MatchError) {
        if let Err(send_err) = self.hub.send_to_user(user_id, Envelope::error(err)).await {
            warn!(user_id = %user_id, error = %send_err, "failed to deliver error frame");
        }
    }
}
