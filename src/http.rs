//! HTTP surface: WebSocket upgrade plus the room and leaderboard REST
//! endpoints
//!
//! The bearer token rides the upgrade request as a query parameter and
//! is verified before the upgrade; REST endpoints take it as an
//! Authorization header. Errors share the wire envelope
//! `{code, message}` with the protocol layer.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::{Claims, TokenVerifier};
use crate::engine::handler::MatchHandler;
use crate::error::{MatchError, Result};
use crate::hub::{Hub, SEND_QUEUE_CAPACITY};
use crate::leaderboard::LeaderboardService;
use crate::protocol::Envelope;
use crate::rooms::{PrivateRoomRequest, RoomManager};

/// Idle connections close after this unless any frame arrives
const READ_DEADLINE: Duration = Duration::from_secs(60);

const VALID_QUESTION_COUNTS: [usize; 3] = [5, 10, 15];

/// Shared state for the router
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<MatchHandler>,
    pub hub: Arc<Hub>,
    pub rooms: Arc<RoomManager>,
    pub leaderboard: Arc<LeaderboardService>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub default_countdown_seconds: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/ws", get(ws_handler))
        .route("/v1/rooms", post(create_room))
        .route("/v1/rooms/:code", get(get_room))
        .route("/v1/leaderboards/private/:code", get(private_leaderboard))
        .route("/v1/leaderboards/:window", get(window_leaderboard))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// JSON error body with the stable code, mapped to an HTTP status
struct ApiError(MatchError);

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "code": self.0.code(),
            "message": self.0.message(),
        });
        (status, Json(body)).into_response()
    }
}

fn bearer_claims(state: &AppState, headers: &HeaderMap) -> Result<Claims> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| MatchError::unauthorized("missing authorization header"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| MatchError::unauthorized("malformed authorization header"))?;
    state.verifier.verify(token)
}

// =============================================================================
// WebSocket
// =============================================================================

#[derive(Debug, Deserialize)]
struct WsAuth {
    token: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = auth.token else {
        return ApiError(MatchError::unauthorized("missing token")).into_response();
    };
    let claims = match state.verifier.verify(&token) {
        Ok(claims) => claims,
        Err(e) => return ApiError(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, claims))
}

/// Per-connection loop: a writer task drains the bounded outbound
/// queue, the reader dispatches envelopes to the match handler under a
/// 60 s deadline refreshed by any inbound frame.
async fn handle_socket(state: AppState, socket: WebSocket, claims: Claims) {
    let user_id = claims.user_id;
    info!(user_id = %user_id, username = %claims.username, "websocket connected");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(SEND_QUEUE_CAPACITY);
    let mut handle = state.hub.register(user_id, outbound_tx).await;

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(env) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&env) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        // Stop reading the moment a newer connection for this user is
        // registered; a superseded client must not keep acting.
        let next = tokio::select! {
            _ = &mut handle.closed => {
                info!(user_id = %user_id, "connection superseded, closing");
                break;
            }
            next = tokio::time::timeout(READ_DEADLINE, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                info!(user_id = %user_id, "read deadline expired, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(user_id = %user_id, error = %e, "websocket read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(env) => state.handler.handle_message(&claims, env).await,
                Err(e) => {
                    debug!(user_id = %user_id, error = %e, "unparseable frame");
                    let err = MatchError::invalid_payload("message is not a valid envelope");
                    let _ = state.hub.send_to_user(user_id, Envelope::error(&err)).await;
                }
            },
            Message::Binary(_) => {
                let err = MatchError::invalid_payload("binary frames are not supported");
                let _ = state.hub.send_to_user(user_id, Envelope::error(&err)).await;
            }
            // Control frames refresh the deadline; tungstenite answers
            // pings on its own
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    state.hub.unregister(user_id, handle.conn_id).await;
    writer.abort();
    info!(user_id = %user_id, "websocket disconnected");
}

// =============================================================================
// Rooms
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateRoomBody {
    match_name: String,
    #[serde(default)]
    max_players: Option<usize>,
    question_count: usize,
    per_question_seconds: u64,
    #[serde(default)]
    category: Option<String>,
}

fn validate_room_body(body: &CreateRoomBody) -> Result<()> {
    if body.match_name.trim().is_empty() {
        return Err(MatchError::validation("match_name must not be empty"));
    }
    if let Some(max) = body.max_players {
        if max != 2 {
            return Err(MatchError::validation("max_players must be 2"));
        }
    }
    if !VALID_QUESTION_COUNTS.contains(&body.question_count) {
        return Err(MatchError::validation("question_count must be 5, 10, or 15"));
    }
    if body.per_question_seconds == 0 {
        return Err(MatchError::validation("per_question_seconds must be positive"));
    }
    Ok(())
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRoomBody>,
) -> std::result::Result<Response, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    if claims.is_guest {
        return Err(ApiError(MatchError::GuestsCannotCreateRooms));
    }
    validate_room_body(&body)?;

    let room = state
        .rooms
        .create_room(PrivateRoomRequest {
            host_id: claims.user_id,
            host_username: claims.username,
            match_name: body.match_name,
            question_count: body.question_count,
            per_question_seconds: body.per_question_seconds,
            category: body.category,
            start_countdown_seconds: state.default_countdown_seconds,
        })
        .await?;

    let body = json!({
        "room_code": room.room_code,
        "room": room,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn get_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let room = state.rooms.get_room(&code).await?;
    Ok(Json(json!({ "room": room })).into_response())
}

// =============================================================================
// Leaderboards
// =============================================================================

#[derive(Debug, Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn window_leaderboard(
    State(state): State<AppState>,
    Path(window): Path<String>,
    Query(query): Query<LimitQuery>,
) -> std::result::Result<Response, ApiError> {
    let entries = state
        .leaderboard
        .top(&window, query.limit.unwrap_or(10))
        .await?;
    Ok(Json(json!({ "window": window, "entries": entries })).into_response())
}

async fn private_leaderboard(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<LimitQuery>,
) -> std::result::Result<Response, ApiError> {
    let entries = state
        .leaderboard
        .private_room_top(&code, query.limit.unwrap_or(10))
        .await;
    Ok(Json(json!({ "room_code": code, "entries": entries })).into_response())
}
