use serde::{Deserialize, Serialize};

/// One room-scoped participant. A fresh `Player` is created every time a
/// username joins a room and dropped when they leave it; nothing here
/// survives across rooms.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Player {
    pub username: String,
    pub ready: bool,
    /// Completion percentage in `[0, 100]`. The coordinator validates bounds
    /// and monotonicity before calling [`Player::set_progress`].
    pub progress: u8,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ready: false,
            progress: 0,
        }
    }

    pub fn toggle_ready(&mut self) {
        self.ready = !self.ready;
    }

    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress;
    }

    /// Returns the player to their pre-race state.
    pub fn reset(&mut self) {
        self.ready = false;
        self.progress = 0;
    }
}
