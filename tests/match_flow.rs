//! End-to-end match flows driven through the protocol handler
//!
//! A test client is a registered hub channel; envelopes go in through
//! the handler exactly as the WebSocket layer would deliver them, and
//! replies come out of the client's bounded queue.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use faceoff::auth::Claims;
use faceoff::config::Config;
use faceoff::engine::handler::MatchHandler;
use faceoff::engine::MatchService;
use faceoff::error::Result;
use faceoff::hub::{Hub, SEND_QUEUE_CAPACITY};
use faceoff::leaderboard::LeaderboardService;
use faceoff::protocol::*;
use faceoff::questions::assembler::PackAssembler;
use faceoff::questions::Question;
use faceoff::queue::MatchmakingQueue;
use faceoff::rooms::{PrivateRoomRequest, RoomManager};
use faceoff::scoring::{ScoringConfig, ScoringEngine};
use faceoff::storage::{MatchRepository, MemoryMatchRepository, QuestionRepository};
use faceoff::store::MatchStateStore;
use faceoff::MatchStatus;

/// Deterministic curated pool: disjoint questions on every fetch
struct SequencedRepo {
    next: AtomicUsize,
}

#[async_trait]
impl QuestionRepository for SequencedRepo {
    async fn fetch_pool(&self, limit: usize) -> Result<Vec<Question>> {
        let start = self.next.fetch_add(limit, Ordering::SeqCst);
        Ok((start..start + limit)
            .map(|i| Question {
                id: format!("q-{}", i),
                prompt: format!("prompt {}", i),
                options: vec![
                    format!("option-a-{}", i),
                    format!("option-b-{}", i),
                    format!("option-c-{}", i),
                    format!("option-d-{}", i),
                ],
                answer: format!("option-a-{}", i),
                source: "curated".to_string(),
            })
            .collect())
    }

    async fn insert_verified(&self, _questions: &[Question]) -> Result<()> {
        Ok(())
    }
}

struct TestApp {
    handler: Arc<MatchHandler>,
    hub: Arc<Hub>,
    rooms: Arc<RoomManager>,
    leaderboard: Arc<LeaderboardService>,
    store: Arc<MatchStateStore>,
    repo: Arc<MemoryMatchRepository>,
}

fn test_app() -> TestApp {
    let config = Config::default();
    let repo = Arc::new(MemoryMatchRepository::new());
    let store = Arc::new(MatchStateStore::new());
    let hub = Arc::new(Hub::new());
    let rooms = Arc::new(RoomManager::new());
    let queue = Arc::new(MatchmakingQueue::new(Duration::from_secs(10)));
    let leaderboard = Arc::new(LeaderboardService::new(Arc::clone(&store), 50));

    let assembler = Arc::new(PackAssembler::new(
        Arc::new(SequencedRepo {
            next: AtomicUsize::new(0),
        }),
        None,
        Arc::clone(&store),
        "flow-test-secret",
    ));
    let service = Arc::new(MatchService::new(
        Arc::clone(&repo) as Arc<dyn MatchRepository>,
        assembler,
        Arc::clone(&store),
        Arc::clone(&leaderboard),
        ScoringEngine::new(ScoringConfig::default()),
        config.runtime.clone(),
    ));
    let handler = Arc::new(MatchHandler::new(
        service,
        Arc::clone(&hub),
        queue,
        Arc::clone(&rooms),
        config.runtime,
    ));

    TestApp {
        handler,
        hub,
        rooms,
        leaderboard,
        store,
        repo,
    }
}

async fn connect(app: &TestApp, name: &str, is_guest: bool) -> (Claims, mpsc::Receiver<Envelope>) {
    let claims = Claims {
        user_id: Uuid::new_v4(),
        username: name.to_string(),
        is_guest,
        expires_at: 0,
    };
    let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
    app.hub.register(claims.user_id, tx).await;
    (claims, rx)
}

async fn send<T: serde::Serialize>(app: &TestApp, claims: &Claims, kind: &str, payload: &T) {
    let env = Envelope::new(kind, payload).unwrap();
    app.handler.handle_message(claims, env).await;
}

/// Wait for the next envelope of the given kind, skipping others
async fn recv_kind(rx: &mut mpsc::Receiver<Envelope>, kind: &str) -> Envelope {
    loop {
        let env = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", kind))
            .expect("connection channel closed");
        if env.kind == kind {
            return env;
        }
    }
}

async fn answer_all(
    app: &TestApp,
    claims: &Claims,
    rx: &mut mpsc::Receiver<Envelope>,
    match_id: &str,
    batch: &[QuestionPayload],
) {
    let match_uuid: Uuid = match_id.parse().unwrap();
    let pack = app.store.match_questions(match_uuid).await.unwrap();
    for item in batch {
        let correct = pack
            .iter()
            .find(|q| q.token == item.token)
            .map(|q| q.correct_answer.clone())
            .expect("token must resolve server-side");
        send(
            app,
            claims,
            TYPE_SUBMIT_ANSWER,
            &SubmitAnswerPayload {
                match_id: match_id.to_string(),
                question_token: item.token.clone(),
                answer: correct,
                client_latency_ms: None,
            },
        )
        .await;
        let ack = recv_kind(rx, TYPE_ANSWER_ACK).await;
        let ack: AnswerAckPayload = ack.parse().unwrap();
        assert!(ack.accepted);
    }
}

#[tokio::test]
async fn test_random_pair_full_match() {
    let app = test_app();
    let (alice, mut alice_rx) = connect(&app, "alice", false).await;
    let (bob, mut bob_rx) = connect(&app, "bob", false).await;

    send(
        &app,
        &alice,
        TYPE_JOIN_QUEUE,
        &JoinQueuePayload {
            question_count: Some(5),
            category: None,
            preferred_difficulty: None,
            bot_ok: None,
        },
    )
    .await;
    let update = recv_kind(&mut alice_rx, TYPE_QUEUE_UPDATE).await;
    let update: QueueUpdatePayload = update.parse().unwrap();
    assert_eq!(update.status, "waiting");
    assert_eq!(update.position, 0);

    send(
        &app,
        &bob,
        TYPE_JOIN_QUEUE,
        &JoinQueuePayload {
            question_count: Some(5),
            category: None,
            preferred_difficulty: None,
            bot_ok: None,
        },
    )
    .await;

    // Both players see the same match
    let found_a: MatchFoundPayload = recv_kind(&mut alice_rx, TYPE_MATCH_FOUND)
        .await
        .parse()
        .unwrap();
    let found_b: MatchFoundPayload = recv_kind(&mut bob_rx, TYPE_MATCH_FOUND)
        .await
        .parse()
        .unwrap();
    assert_eq!(found_a.match_id, found_b.match_id);
    assert_eq!(found_a.players.len(), 2);
    assert_eq!(found_a.question_count, 5);
    assert_eq!(found_a.per_question_seconds, 15);
    assert_eq!(found_a.global_timeout_seconds, 95);

    let batch_env = recv_kind(&mut alice_rx, TYPE_QUESTION_BATCH).await;
    // The wire never carries the answer key
    let raw = serde_json::to_string(&batch_env).unwrap();
    assert!(!raw.contains("correct_answer"));

    let batch: QuestionBatchPayload = batch_env.parse().unwrap();
    let batch_b: QuestionBatchPayload = recv_kind(&mut bob_rx, TYPE_QUESTION_BATCH)
        .await
        .parse()
        .unwrap();
    assert_eq!(batch.batch.len(), 5);
    let orders: HashSet<usize> = batch.batch.iter().map(|q| q.order).collect();
    assert_eq!(orders, (1..=5).collect::<HashSet<usize>>());

    answer_all(&app, &alice, &mut alice_rx, &found_a.match_id, &batch.batch).await;
    answer_all(&app, &bob, &mut bob_rx, &found_b.match_id, &batch_b.batch).await;

    let complete_a: MatchCompletePayload = recv_kind(&mut alice_rx, TYPE_MATCH_COMPLETE)
        .await
        .parse()
        .unwrap();
    let complete_b: MatchCompletePayload = recv_kind(&mut bob_rx, TYPE_MATCH_COMPLETE)
        .await
        .parse()
        .unwrap();
    assert_eq!(complete_a.match_id, found_a.match_id);
    assert_eq!(complete_b.match_id, found_a.match_id);
    assert!(complete_a.leaderboard_eligible);

    for result in &complete_a.results {
        assert_eq!(result.accuracy, 1.0);
        assert_eq!(result.status, "completed");
        // Full marks modulo at most one timer tick of bonus decay
        assert!(
            result.final_score >= 820 && result.final_score <= 825,
            "unexpected score {}",
            result.final_score
        );
    }

    // Both tied: both ranked and both counted a win
    let top = app.leaderboard.top("all_time", 10).await.unwrap();
    assert_eq!(top.len(), 2);
    assert!(top.iter().all(|e| e.wins == 1));

    // Durable row is terminal
    let match_uuid: Uuid = found_a.match_id.parse().unwrap();
    let stored = app.repo.stored_match(match_uuid).await.unwrap();
    assert_eq!(stored.status, MatchStatus::Completed);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_private_room_flow() {
    let app = test_app();
    let (host, mut host_rx) = connect(&app, "host", false).await;
    let (guest, mut guest_rx) = connect(&app, "guest", true).await;

    let room = app
        .rooms
        .create_room(PrivateRoomRequest {
            host_id: host.user_id,
            host_username: host.username.clone(),
            match_name: "after work".to_string(),
            question_count: 10,
            per_question_seconds: 15,
            category: Some("history".to_string()),
            start_countdown_seconds: 0,
        })
        .await
        .unwrap();
    let code = room.room_code.clone();
    assert_eq!(code.len(), 6);

    send(
        &app,
        &guest,
        TYPE_JOIN_PRIVATE,
        &JoinPrivatePayload {
            room_code: code.clone(),
        },
    )
    .await;

    let update: PrivateRoomUpdatePayload = recv_kind(&mut guest_rx, TYPE_PRIVATE_ROOM_UPDATE)
        .await
        .parse()
        .unwrap();
    assert_eq!(update.room_code, code);
    assert_eq!(update.players.len(), 2);
    assert_eq!(update.slots_remaining, 0);
    let match_id = update.match_id.expect("second join starts the match");

    // Pack dispatch runs async after the (zero-length) countdown
    let batch_host: QuestionBatchPayload = recv_kind(&mut host_rx, TYPE_QUESTION_BATCH)
        .await
        .parse()
        .unwrap();
    let batch_guest: QuestionBatchPayload = recv_kind(&mut guest_rx, TYPE_QUESTION_BATCH)
        .await
        .parse()
        .unwrap();
    assert_eq!(batch_host.batch.len(), 10);
    assert_eq!(batch_guest.batch.len(), 10);

    answer_all(&app, &host, &mut host_rx, &match_id, &batch_host.batch).await;
    answer_all(&app, &guest, &mut guest_rx, &match_id, &batch_guest.batch).await;

    let complete: MatchCompletePayload = recv_kind(&mut host_rx, TYPE_MATCH_COMPLETE)
        .await
        .parse()
        .unwrap();
    assert_eq!(complete.results.len(), 2);

    // Room-scoped board holds exactly host and guest; windows untouched
    let room_top = app.leaderboard.private_room_top(&code, 10).await;
    assert_eq!(room_top.len(), 2);
    let names: HashSet<String> = room_top.iter().map(|e| e.username.clone()).collect();
    assert!(names.contains("host") && names.contains("guest"));

    assert!(app.leaderboard.top("all_time", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_question_token_rejected() {
    let app = test_app();
    let (alice, mut alice_rx) = connect(&app, "alice", false).await;
    let (bob, mut bob_rx) = connect(&app, "bob", false).await;

    for claims in [&alice, &bob] {
        send(
            &app,
            claims,
            TYPE_JOIN_QUEUE,
            &JoinQueuePayload {
                question_count: Some(5),
                category: None,
                preferred_difficulty: None,
                bot_ok: None,
            },
        )
        .await;
    }
    let found: MatchFoundPayload = recv_kind(&mut alice_rx, TYPE_MATCH_FOUND)
        .await
        .parse()
        .unwrap();
    let _ = recv_kind(&mut bob_rx, TYPE_MATCH_FOUND).await;

    send(
        &app,
        &alice,
        TYPE_SUBMIT_ANSWER,
        &SubmitAnswerPayload {
            match_id: found.match_id.clone(),
            question_token: "forged".to_string(),
            answer: "anything".to_string(),
            client_latency_ms: None,
        },
    )
    .await;

    let err: ErrorPayload = recv_kind(&mut alice_rx, TYPE_ERROR).await.parse().unwrap();
    assert_eq!(err.code, "invalid_question_token");

    // No state mutation
    let match_uuid: Uuid = found.match_id.parse().unwrap();
    let state = app
        .store
        .player_state(match_uuid, alice.user_id)
        .await
        .unwrap();
    assert!(state.answers.is_empty());
}

#[tokio::test]
async fn test_protocol_errors() {
    let app = test_app();
    let (alice, mut alice_rx) = connect(&app, "alice", false).await;

    // Unknown type
    let env = Envelope {
        kind: "warp_drive".to_string(),
        payload: serde_json::Value::Null,
        request_id: None,
    };
    app.handler.handle_message(&alice, env).await;
    let err: ErrorPayload = recv_kind(&mut alice_rx, TYPE_ERROR).await.parse().unwrap();
    assert_eq!(err.code, "unknown_message_type");

    // Malformed payload
    let env = Envelope {
        kind: TYPE_SUBMIT_ANSWER.to_string(),
        payload: serde_json::json!({"match_id": 17}),
        request_id: None,
    };
    app.handler.handle_message(&alice, env).await;
    let err: ErrorPayload = recv_kind(&mut alice_rx, TYPE_ERROR).await.parse().unwrap();
    assert_eq!(err.code, "invalid_payload");

    // Reserved wire names answer with feature_not_available
    send(
        &app,
        &alice,
        TYPE_ACCEPT_BOT_FILL,
        &AcceptBotFillPayload {
            queue_token: Uuid::new_v4().to_string(),
            accept: true,
        },
    )
    .await;
    let err: ErrorPayload = recv_kind(&mut alice_rx, TYPE_ERROR).await.parse().unwrap();
    assert_eq!(err.code, "feature_not_available");

    send(
        &app,
        &alice,
        TYPE_READY_STATE,
        &ReadyStatePayload {
            match_id: Uuid::new_v4().to_string(),
            ready: true,
        },
    )
    .await;
    let err: ErrorPayload = recv_kind(&mut alice_rx, TYPE_ERROR).await.parse().unwrap();
    assert_eq!(err.code, "feature_not_available");
}

#[tokio::test]
async fn test_queue_cancel() {
    let app = test_app();
    let (alice, mut alice_rx) = connect(&app, "alice", false).await;

    send(
        &app,
        &alice,
        TYPE_JOIN_QUEUE,
        &JoinQueuePayload {
            question_count: None,
            category: None,
            preferred_difficulty: None,
            bot_ok: None,
        },
    )
    .await;
    let update: QueueUpdatePayload = recv_kind(&mut alice_rx, TYPE_QUEUE_UPDATE)
        .await
        .parse()
        .unwrap();

    send(
        &app,
        &alice,
        TYPE_CANCEL_QUEUE,
        &CancelQueuePayload {
            queue_token: update.queue_token.clone(),
        },
    )
    .await;
    let cancelled: QueueUpdatePayload = recv_kind(&mut alice_rx, TYPE_QUEUE_UPDATE)
        .await
        .parse()
        .unwrap();
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(cancelled.position, -1);

    // Cancelling again: the token is gone
    send(
        &app,
        &alice,
        TYPE_CANCEL_QUEUE,
        &CancelQueuePayload {
            queue_token: update.queue_token,
        },
    )
    .await;
    let err: ErrorPayload = recv_kind(&mut alice_rx, TYPE_ERROR).await.parse().unwrap();
    assert_eq!(err.code, "queue_token_not_found");
}

#[tokio::test]
async fn test_request_progress() {
    let app = test_app();
    let (alice, mut alice_rx) = connect(&app, "alice", false).await;
    let (bob, mut bob_rx) = connect(&app, "bob", false).await;

    for claims in [&alice, &bob] {
        send(
            &app,
            claims,
            TYPE_JOIN_QUEUE,
            &JoinQueuePayload {
                question_count: Some(5),
                category: None,
                preferred_difficulty: None,
                bot_ok: None,
            },
        )
        .await;
    }
    let found: MatchFoundPayload = recv_kind(&mut alice_rx, TYPE_MATCH_FOUND)
        .await
        .parse()
        .unwrap();
    let batch: QuestionBatchPayload = recv_kind(&mut alice_rx, TYPE_QUESTION_BATCH)
        .await
        .parse()
        .unwrap();
    let _ = recv_kind(&mut bob_rx, TYPE_QUESTION_BATCH).await;

    // Alice answers one question
    answer_all(&app, &alice, &mut alice_rx, &found.match_id, &batch.batch[..1]).await;

    send(
        &app,
        &bob,
        TYPE_REQUEST_PROGRESS,
        &RequestProgressPayload {
            match_id: found.match_id.clone(),
        },
    )
    .await;
    let progress: ProgressUpdatePayload = recv_kind(&mut bob_rx, TYPE_PROGRESS_UPDATE)
        .await
        .parse()
        .unwrap();
    assert_eq!(progress.players.len(), 2);
    let alice_progress = progress
        .players
        .iter()
        .find(|p| p.user_id == alice.user_id.to_string())
        .unwrap();
    assert_eq!(alice_progress.answered, 1);
    assert_eq!(alice_progress.pending, 4);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_finalizes_abandoned_match() {
    let app = test_app();
    let (alice, mut alice_rx) = connect(&app, "alice", false).await;
    let (bob, mut bob_rx) = connect(&app, "bob", false).await;

    for claims in [&alice, &bob] {
        send(
            &app,
            claims,
            TYPE_JOIN_QUEUE,
            &JoinQueuePayload {
                question_count: Some(5),
                category: None,
                preferred_difficulty: None,
                bot_ok: None,
            },
        )
        .await;
    }
    let found: MatchFoundPayload = recv_kind(&mut alice_rx, TYPE_MATCH_FOUND)
        .await
        .parse()
        .unwrap();
    let _ = recv_kind(&mut bob_rx, TYPE_MATCH_FOUND).await;

    // Nobody answers; run virtual time past the global timeout so the
    // armed deadline task fires
    tokio::time::sleep(Duration::from_secs(120)).await;

    let timeout_env: MatchTimeoutPayload = recv_kind(&mut alice_rx, TYPE_MATCH_TIMEOUT)
        .await
        .parse()
        .unwrap();
    assert_eq!(timeout_env.match_id, found.match_id);

    let complete: MatchCompletePayload = recv_kind(&mut alice_rx, TYPE_MATCH_COMPLETE)
        .await
        .parse()
        .unwrap();
    assert!(complete
        .results
        .iter()
        .all(|r| r.status == "timeout" && r.final_score == 0));

    let match_uuid: Uuid = found.match_id.parse().unwrap();
    let stored = app.repo.stored_match(match_uuid).await.unwrap();
    assert_eq!(stored.status, MatchStatus::Timeout);
}
