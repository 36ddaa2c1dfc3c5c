use serde::{Deserialize, Serialize};

use crate::player::Player;

#[derive(Debug, Copy, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum RoomState {
    Open,
    Closed,
}

/// One race lobby: membership, readiness aggregate, and the finish order of
/// the current race.
///
/// Mutation preconditions (membership, occupancy limits) are validated by the
/// coordinator before any method here is called; `Room` itself only enforces
/// its own state transitions.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub capacity: usize,
    pub state: RoomState,
    /// Members in join order.
    pub players: Vec<Player>,
    /// Usernames in finish order for the current race.
    pub winners: Vec<String>,
    /// Generation token of the race currently in progress, if any. Scheduled
    /// deadline events carry the token they were created for, so a deadline
    /// outliving its race is detected by a simple mismatch.
    race: Option<u64>,
    next_race: u64,
}

impl Room {
    pub fn new(id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            capacity,
            state: RoomState::Open,
            players: Vec::new(),
            winners: Vec::new(),
            race: None,
            next_race: 0,
        }
    }

    /// Appends a new player. The caller must have checked that `username` is
    /// not already a member and that the room is accepting joiners.
    pub fn join(&mut self, username: &str) {
        self.players.push(Player::new(username));
        if self.players.len() >= self.capacity {
            self.state = RoomState::Closed;
        }
    }

    /// Removes `username` from the members and from the finish order.
    /// Reopens the room unless a race is in progress.
    pub fn leave(&mut self, username: &str) {
        self.players.retain(|p| p.username != username);
        self.winners.retain(|w| w != username);
        if self.race.is_none() && self.players.len() < self.capacity {
            self.state = RoomState::Open;
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == RoomState::Open
    }

    pub fn open(&mut self) {
        self.state = RoomState::Open;
    }

    pub fn close(&mut self) {
        self.state = RoomState::Closed;
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.players.iter().any(|p| p.username == username)
    }

    pub fn player_mut(&mut self, username: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.username == username)
    }

    /// True iff the room is non-empty and every member is ready.
    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| p.ready)
    }

    /// Records `username` in the finish order. Returns `false` if they had
    /// already finished, making duplicate `Finished` signals harmless.
    pub fn record_finish(&mut self, username: &str) -> bool {
        if self.winners.iter().any(|w| w == username) {
            return false;
        }
        self.winners.push(username.to_owned());
        true
    }

    /// True iff the room is non-empty and every current member has finished.
    pub fn all_finished(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .iter()
                .all(|p| self.winners.iter().any(|w| *w == p.username))
    }

    /// Marks a race as started and closes the room. Any results left over
    /// from an unacknowledged previous race are discarded so that the new
    /// race starts from a clean finish order. Returns the generation token
    /// identifying this race.
    pub fn start_race(&mut self) -> u64 {
        self.winners.clear();
        for player in &mut self.players {
            player.set_progress(0);
        }
        let race = self.next_race;
        self.next_race += 1;
        self.race = Some(race);
        self.state = RoomState::Closed;
        race
    }

    pub fn race(&self) -> Option<u64> {
        self.race
    }

    /// Clears the active-race token. Player state and the finish order are
    /// left as-is until the clients acknowledge the result with an end-game
    /// event.
    pub fn end_race(&mut self) {
        self.race = None;
    }

    /// Returns every member to their pre-race state and clears the results of
    /// the last race. Reopens the room if it is below capacity.
    pub fn reset(&mut self) {
        self.players.iter_mut().for_each(Player::reset);
        self.winners.clear();
        self.race = None;
        if self.players.len() < self.capacity {
            self.state = RoomState::Open;
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            occupancy: self.players.len(),
            capacity: self.capacity,
            joinable: self.is_open(),
        }
    }
}

/// The room-list view broadcast to every connection.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: String,
    pub occupancy: usize,
    pub capacity: usize,
    pub joinable: bool,
}
