use serde::{Deserialize, Serialize};

pub mod net;
pub mod player;
pub mod room;

/// Protocol version exchanged during the handshake. Clients built against a
/// different version are refused before they can touch any game state.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static game parameters sent to every client at connect time.
#[derive(Debug, Copy, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GameRules {
    /// Maximum occupancy of a single room.
    pub room_capacity: usize,
    /// Countdown shown to players between `StartGame` and typing actually
    /// beginning.
    pub pre_start_seconds: u64,
    /// Fixed duration of a race once typing has begun.
    pub race_seconds: u64,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            room_capacity: 5,
            pre_start_seconds: 10,
            race_seconds: 60,
        }
    }
}
