//! Private room management
//!
//! Host-created rooms addressed by six-digit decimal codes. Codes are
//! rejection-sampled and stay unique among non-terminal rooms; a room
//! that has gone active releases its code.

use std::collections::HashMap;

use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::current_timestamp;
use crate::error::{MatchError, Result};

const ROOM_CODE_MIN: u32 = 100_000;
const ROOM_CODE_MAX: u32 = 999_999;

/// Room lifecycle. Monotone: waiting -> starting -> active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Starting,
    Active,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Starting => "starting",
            RoomStatus::Active => "active",
        }
    }

    /// Non-terminal rooms hold their code exclusively
    fn holds_code(&self) -> bool {
        matches!(self, RoomStatus::Waiting | RoomStatus::Starting)
    }
}

/// A member of a private room, host first
#[derive(Debug, Clone, Serialize)]
pub struct RoomPlayer {
    pub user_id: Uuid,
    pub username: String,
    pub is_guest: bool,
    pub is_host: bool,
    pub joined_at: u64,
}

/// A private match room
#[derive(Debug, Clone, Serialize)]
pub struct PrivateRoom {
    pub room_code: String,
    /// Set when the match is created
    pub match_id: Option<Uuid>,
    pub host_id: Uuid,
    pub match_name: String,
    pub max_players: usize,
    pub question_count: usize,
    pub per_question_seconds: u64,
    pub category: Option<String>,
    pub players: Vec<RoomPlayer>,
    pub status: RoomStatus,
    pub created_at: u64,
    pub start_countdown_seconds: u64,
}

impl PrivateRoom {
    pub fn slots_remaining(&self) -> usize {
        self.max_players.saturating_sub(self.players.len())
    }
}

/// Parameters for room creation
#[derive(Debug, Clone)]
pub struct PrivateRoomRequest {
    pub host_id: Uuid,
    pub host_username: String,
    pub match_name: String,
    pub question_count: usize,
    pub per_question_seconds: u64,
    pub category: Option<String>,
    pub start_countdown_seconds: u64,
}

/// Tracks all live private rooms
pub struct RoomManager {
    rooms: Mutex<HashMap<String, PrivateRoom>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Create a room under a fresh six-digit code
    pub async fn create_room(&self, req: PrivateRoomRequest) -> Result<PrivateRoom> {
        let mut rooms = self.rooms.lock().await;

        let code = generate_code(&rooms);
        let now = current_timestamp();
        let room = PrivateRoom {
            room_code: code.clone(),
            match_id: None,
            host_id: req.host_id,
            match_name: req.match_name,
            max_players: 2,
            question_count: req.question_count,
            per_question_seconds: req.per_question_seconds,
            category: req.category,
            players: vec![RoomPlayer {
                user_id: req.host_id,
                username: req.host_username,
                is_guest: false,
                is_host: true,
                joined_at: now,
            }],
            status: RoomStatus::Waiting,
            created_at: now,
            start_countdown_seconds: req.start_countdown_seconds,
        };

        info!(room_code = %code, host_id = %req.host_id, "private room created");
        rooms.insert(code, room.clone());
        Ok(room)
    }

    /// Add a player to an existing room
    pub async fn join_room(
        &self,
        room_code: &str,
        user_id: Uuid,
        username: String,
        is_guest: bool,
    ) -> Result<PrivateRoom> {
        let mut rooms = self.rooms.lock().await;

        let room = rooms
            .get_mut(room_code)
            .ok_or_else(|| MatchError::RoomNotFound(format!("room {} not found", room_code)))?;

        if room.status != RoomStatus::Waiting {
            return Err(MatchError::RoomNotAccepting(format!(
                "room {} is not accepting players",
                room_code
            )));
        }
        if user_id == room.host_id {
            return Err(MatchError::HostCannotRejoin(
                "the host is already a member of this room".to_string(),
            ));
        }
        if room.players.iter().any(|p| p.user_id == user_id) {
            return Err(MatchError::UserAlreadyInRoom(
                "user is already in this room".to_string(),
            ));
        }
        if room.players.len() >= room.max_players {
            return Err(MatchError::RoomFull(format!("room {} is full", room_code)));
        }

        room.players.push(RoomPlayer {
            user_id,
            username,
            is_guest,
            is_host: false,
            joined_at: current_timestamp(),
        });

        info!(
            room_code = %room_code,
            user_id = %user_id,
            player_count = room.players.len(),
            "player joined room"
        );
        Ok(room.clone())
    }

    pub async fn get_room(&self, room_code: &str) -> Result<PrivateRoom> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room_code)
            .cloned()
            .ok_or_else(|| MatchError::RoomNotFound(format!("room {} not found", room_code)))
    }

    /// Bind the created match and promote waiting -> starting. Requires
    /// at least two players.
    pub async fn start_room(
        &self,
        room_code: &str,
        match_id: Uuid,
        countdown_seconds: u64,
    ) -> Result<PrivateRoom> {
        let mut rooms = self.rooms.lock().await;

        let room = rooms
            .get_mut(room_code)
            .ok_or_else(|| MatchError::RoomNotFound(format!("room {} not found", room_code)))?;

        if room.status != RoomStatus::Waiting {
            return Err(MatchError::RoomCannotStart(format!(
                "room {} cannot be started from {}",
                room_code,
                room.status.as_str()
            )));
        }
        if room.players.len() < 2 {
            return Err(MatchError::NeedTwoPlayers(
                "a match needs at least two players".to_string(),
            ));
        }

        room.match_id = Some(match_id);
        room.status = RoomStatus::Starting;
        if countdown_seconds > 0 {
            room.start_countdown_seconds = countdown_seconds;
        }

        info!(
            room_code = %room_code,
            match_id = %match_id,
            countdown = room.start_countdown_seconds,
            "room starting"
        );
        Ok(room.clone())
    }

    /// Promote starting -> active once the pack is dispatched; the code
    /// becomes available for new rooms.
    pub async fn activate_room(&self, room_code: &str) -> Result<PrivateRoom> {
        let mut rooms = self.rooms.lock().await;

        let room = rooms
            .get_mut(room_code)
            .ok_or_else(|| MatchError::RoomNotFound(format!("room {} not found", room_code)))?;

        if room.status != RoomStatus::Starting {
            return Err(MatchError::RoomCannotStart(format!(
                "room {} cannot activate from {}",
                room_code,
                room.status.as_str()
            )));
        }

        room.status = RoomStatus::Active;
        Ok(room.clone())
    }

    /// Codes held by non-terminal rooms, for uniqueness checks
    pub async fn live_codes(&self) -> Vec<String> {
        let rooms = self.rooms.lock().await;
        rooms
            .values()
            .filter(|r| r.status.holds_code())
            .map(|r| r.room_code.clone())
            .collect()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejection-sample a uniform six-digit code not held by a non-terminal
/// room. Expected O(1) while live rooms are far below the code space.
fn generate_code(rooms: &HashMap<String, PrivateRoom>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let code = rng.gen_range(ROOM_CODE_MIN..=ROOM_CODE_MAX).to_string();
        match rooms.get(&code) {
            Some(existing) if existing.status.holds_code() => continue,
            _ => return code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host_id: Uuid) -> PrivateRoomRequest {
        PrivateRoomRequest {
            host_id,
            host_username: "host".to_string(),
            match_name: "friday night".to_string(),
            question_count: 10,
            per_question_seconds: 15,
            category: Some("history".to_string()),
            start_countdown_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_room_code_is_six_decimal_digits() {
        let mgr = RoomManager::new();
        let room = mgr.create_room(request(Uuid::new_v4())).await.unwrap();
        assert_eq!(room.room_code.len(), 6);
        let n: u32 = room.room_code.parse().unwrap();
        assert!((100_000..=999_999).contains(&n));
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(room.players[0].is_host);
    }

    #[tokio::test]
    async fn test_live_codes_are_distinct() {
        let mgr = RoomManager::new();
        for _ in 0..50 {
            mgr.create_room(request(Uuid::new_v4())).await.unwrap();
        }
        let codes = mgr.live_codes().await;
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), 50);
    }

    #[tokio::test]
    async fn test_join_validations() {
        let mgr = RoomManager::new();
        let host = Uuid::new_v4();
        let room = mgr.create_room(request(host)).await.unwrap();
        let code = room.room_code.clone();

        let err = mgr
            .join_room("000000", Uuid::new_v4(), "x".into(), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "room_not_found");

        let err = mgr.join_room(&code, host, "host".into(), false).await.unwrap_err();
        assert_eq!(err.code(), "host_cannot_rejoin");

        let guest = Uuid::new_v4();
        mgr.join_room(&code, guest, "guest".into(), true).await.unwrap();

        let err = mgr.join_room(&code, guest, "guest".into(), true).await.unwrap_err();
        assert_eq!(err.code(), "user_already_in_room");

        let err = mgr
            .join_room(&code, Uuid::new_v4(), "third".into(), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "room_full");
    }

    #[tokio::test]
    async fn test_start_requires_two_players() {
        let mgr = RoomManager::new();
        let room = mgr.create_room(request(Uuid::new_v4())).await.unwrap();
        let code = room.room_code.clone();

        let err = mgr.start_room(&code, Uuid::new_v4(), 5).await.unwrap_err();
        assert_eq!(err.code(), "need_at_least_two_players");

        mgr.join_room(&code, Uuid::new_v4(), "guest".into(), true)
            .await
            .unwrap();
        let match_id = Uuid::new_v4();
        let started = mgr.start_room(&code, match_id, 3).await.unwrap();
        assert_eq!(started.status, RoomStatus::Starting);
        assert_eq!(started.match_id, Some(match_id));
        assert_eq!(started.start_countdown_seconds, 3);
    }

    #[tokio::test]
    async fn test_status_is_monotone() {
        let mgr = RoomManager::new();
        let room = mgr.create_room(request(Uuid::new_v4())).await.unwrap();
        let code = room.room_code.clone();
        mgr.join_room(&code, Uuid::new_v4(), "guest".into(), true)
            .await
            .unwrap();
        mgr.start_room(&code, Uuid::new_v4(), 5).await.unwrap();

        // No joining past waiting
        let err = mgr
            .join_room(&code, Uuid::new_v4(), "late".into(), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "room_not_accepting_players");

        // No double start
        let err = mgr.start_room(&code, Uuid::new_v4(), 5).await.unwrap_err();
        assert_eq!(err.code(), "match_cannot_be_started");

        mgr.activate_room(&code).await.unwrap();
        assert!(mgr.live_codes().await.is_empty());
    }
}
