use serde::{Deserialize, Serialize};

use crate::player::Player;
use crate::room::RoomSummary;
use crate::GameRules;

use super::ProtocolError;

/// Every frame exchanged between a client and the server.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum Message {
    Error { error: ProtocolError },
    /// First frame a client sends: its protocol version and the display name
    /// it wants to race under.
    Hello { version: String, username: String },
    /// Direct reply accepting the connection.
    InitialConfig { rules: GameRules },
    /// Direct reply refusing the connection: the name is already online.
    UsernameAlreadyExists,
    /// Any in-game event from a connected client.
    Game(GameMessage),
    /// Sent to every connection whenever the room list changes.
    UpdateRooms { rooms: Vec<RoomSummary> },
    /// Sent to a room's members whenever membership or readiness changes.
    UpdatePlayers { players: Vec<Player> },
    /// Sent to a room's members whenever any member's progress changes.
    UpdateProgress { players: Vec<Player> },
    /// Direct reply to the creator of a new room.
    RoomCreated { room_id: String },
    /// Direct reply when the requested room id is already taken.
    RoomNotCreated,
    /// Sent to a room's members when a race begins, carrying the one text
    /// everyone types.
    StartGame { text: String },
    /// Sent to a room's members with the finish order once the race is over.
    GameOver { winners: Vec<String> },
}

impl From<GameMessage> for Message {
    fn from(msg: GameMessage) -> Self {
        Self::Game(msg)
    }
}

/// In-game client events. The acting username is the connection's identity;
/// clients never name themselves in a payload.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum GameMessage {
    CreateRoom { name: String },
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    ToggleReady { room_id: String },
    UpdateProgress { room_id: String, percentage: u8 },
    Finished { room_id: String },
    EndGame { room_id: String },
}
