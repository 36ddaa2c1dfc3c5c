use std::collections::HashMap;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;
use typerace_lib::net::{Message, ProtocolError};
use typerace_lib::room::{Room, RoomSummary};
use typerace_lib::GameRules;

use super::{CoordinatorError, CoordinatorResult};

pub struct Coordinator {
    receiver: mpsc::Receiver<Action>,
    /// Lets scheduled race deadlines feed an event back into the queue
    /// without keeping the actor alive on their own.
    self_sender: mpsc::WeakSender<Action>,
    rules: GameRules,
    texts: &'static [&'static str],
    /// Room directory: every currently existing room by id.
    rooms: HashMap<String, Room>,
    /// Player registry: every connected display name, each with the outbound
    /// channel of its connection.
    registry: HashMap<String, mpsc::Sender<Message>>,
}

#[derive(Debug)]
pub enum Action {
    Connect {
        respond_to: oneshot::Sender<CoordinatorResult<()>>,
        username: String,
        sender: mpsc::Sender<Message>,
    },
    Disconnect {
        username: String,
    },
    CreateRoom {
        username: String,
        name: String,
    },
    JoinRoom {
        username: String,
        room_id: String,
    },
    LeaveRoom {
        username: String,
        room_id: String,
    },
    ToggleReady {
        username: String,
        room_id: String,
    },
    UpdateProgress {
        username: String,
        room_id: String,
        percentage: u8,
    },
    Finished {
        username: String,
        room_id: String,
    },
    EndGame {
        room_id: String,
    },
    RaceDeadline {
        room_id: String,
        race: u64,
    },
}

/// A race-deadline follow-up event, produced by a handler and scheduled by
/// the run loop. Carries the race generation it belongs to so that it is a
/// no-op once that race is over or its room is gone.
#[derive(Debug, PartialEq, Eq)]
struct Deadline {
    room_id: String,
    race: u64,
    after: Duration,
}

impl Coordinator {
    pub(super) fn new(
        receiver: mpsc::Receiver<Action>,
        self_sender: mpsc::WeakSender<Action>,
        rules: GameRules,
        texts: &'static [&'static str],
    ) -> Self {
        Self {
            receiver,
            self_sender,
            rules,
            texts,
            rooms: HashMap::new(),
            registry: HashMap::new(),
        }
    }

    pub(super) async fn run(mut self) {
        tracing::info!("Event coordinator running");
        while let Some(msg) = self.receiver.recv().await {
            // Handlers are synchronous: each one runs to completion before
            // the next event is taken off the queue, so room and registry
            // state is never observed mid-mutation.
            let deadline = match msg {
                Action::Connect {
                    respond_to,
                    username,
                    sender,
                } => {
                    let _ = respond_to.send(self.connect(username, sender));
                    None
                }
                Action::Disconnect { username } => self.disconnect(&username),
                Action::CreateRoom { username, name } => {
                    self.create_room(&username, name);
                    None
                }
                Action::JoinRoom { username, room_id } => self.join_room(&username, &room_id),
                Action::LeaveRoom { username, room_id } => self.leave_room(&username, &room_id),
                Action::ToggleReady { username, room_id } => {
                    self.toggle_ready(&username, &room_id)
                }
                Action::UpdateProgress {
                    username,
                    room_id,
                    percentage,
                } => {
                    self.update_progress(&username, &room_id, percentage);
                    None
                }
                Action::Finished { username, room_id } => {
                    self.finished(&username, &room_id);
                    None
                }
                Action::EndGame { room_id } => {
                    self.end_game(&room_id);
                    None
                }
                Action::RaceDeadline { room_id, race } => {
                    self.race_deadline(&room_id, race);
                    None
                }
            };

            if let Some(deadline) = deadline {
                self.schedule(deadline);
            }
        }
        tracing::info!("Event coordinator stopped");
    }

    fn schedule(&self, deadline: Deadline) {
        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline.after).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender
                    .send(Action::RaceDeadline {
                        room_id: deadline.room_id,
                        race: deadline.race,
                    })
                    .await;
            }
        });
    }

    // ------------------------------------------------------------------
    // Outbound helpers
    // ------------------------------------------------------------------

    /// Sends directly to one connection. `try_send` keeps the event loop
    /// from ever blocking on a slow client; an overflowing connection loses
    /// the frame.
    fn send_to(&self, username: &str, message: Message) {
        if let Some(tx) = self.registry.get(username) {
            if tx.try_send(message).is_err() {
                tracing::warn!(username, "Dropping outbound message for unresponsive connection");
            }
        }
    }

    /// Sends to every member of a room.
    fn send_room(&self, room_id: &str, message: Message) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        for player in &room.players {
            self.send_to(&player.username, message.clone());
        }
    }

    /// Sends the current room list to every connection.
    fn broadcast_rooms(&self) {
        let rooms = self.room_list();
        for username in self.registry.keys() {
            self.send_to(username, Message::UpdateRooms { rooms: rooms.clone() });
        }
    }

    fn room_list(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<_> = self.rooms.values().map(Room::summary).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    fn room_of(&self, username: &str) -> Option<String> {
        self.rooms
            .values()
            .find(|r| r.contains(username))
            .map(|r| r.id.clone())
    }
}

// ----------------------------------------------------------------------------
// Event Handlers
// ----------------------------------------------------------------------------
impl Coordinator {
    #[instrument(skip(self, sender))]
    fn connect(
        &mut self,
        username: String,
        sender: mpsc::Sender<Message>,
    ) -> CoordinatorResult<()> {
        if self.registry.contains_key(&username) {
            tracing::warn!("Rejected connection for a name that is already online");
            return Err(CoordinatorError::UsernameTaken(username));
        }

        self.registry.insert(username.clone(), sender);
        self.send_to(&username, Message::InitialConfig { rules: self.rules });
        self.send_to(
            &username,
            Message::UpdateRooms {
                rooms: self.room_list(),
            },
        );
        tracing::info!("Player connected");
        Ok(())
    }

    /// Transport teardown funnels through the same path as an explicit
    /// leave for whichever room the player occupied.
    #[instrument(skip(self))]
    fn disconnect(&mut self, username: &str) -> Option<Deadline> {
        let deadline = self
            .room_of(username)
            .and_then(|room_id| self.leave_room(username, &room_id));

        if self.registry.remove(username).is_some() {
            tracing::info!("Player disconnected");
        }
        deadline
    }

    #[instrument(skip(self))]
    fn create_room(&mut self, username: &str, name: String) {
        // One room per player: a member cannot open a second room while
        // still listed in their current one.
        if let Some(current) = self.room_of(username) {
            tracing::warn!(current, "Rejected room creation by a player already in a room");
            self.send_to(
                username,
                Message::Error {
                    error: ProtocolError::AlreadyInRoom(current),
                },
            );
            return;
        }
        if self.rooms.contains_key(&name) {
            tracing::warn!("Room id already taken");
            self.send_to(username, Message::RoomNotCreated);
            return;
        }

        let mut room = Room::new(name.clone(), self.rules.room_capacity);
        room.join(username);
        tracing::info!("Room created");

        self.send_to(username, Message::RoomCreated { room_id: name.clone() });
        self.send_to(
            username,
            Message::UpdatePlayers {
                players: room.players.clone(),
            },
        );
        self.rooms.insert(name, room);
        self.broadcast_rooms();
    }

    #[instrument(skip(self))]
    fn join_room(&mut self, username: &str, room_id: &str) -> Option<Deadline> {
        {
            let room = self.rooms.get(room_id)?;
            // One room per player: this also covers re-joining `room_id`
            // itself.
            if let Some(current) = self.room_of(username) {
                self.send_to(
                    username,
                    Message::Error {
                        error: ProtocolError::AlreadyInRoom(current),
                    },
                );
                return None;
            }
            if !room.is_open() {
                self.send_to(
                    username,
                    Message::Error {
                        error: ProtocolError::RoomClosed(room_id.to_owned()),
                    },
                );
                return None;
            }
        }

        let room = self.rooms.get_mut(room_id)?;
        room.join(username);
        let players = room.players.clone();
        tracing::info!("Player joined room");

        self.send_room(room_id, Message::UpdatePlayers { players });
        self.broadcast_rooms();
        self.maybe_start(room_id)
    }

    #[instrument(skip(self))]
    fn leave_room(&mut self, username: &str, room_id: &str) -> Option<Deadline> {
        if !self.rooms.get(room_id)?.contains(username) {
            return None;
        }

        let room = self.rooms.get_mut(room_id)?;
        room.leave(username);
        tracing::info!("Player left room");

        if room.is_empty() {
            self.rooms.remove(room_id);
            tracing::info!("Room destroyed");
            self.broadcast_rooms();
            return None;
        }

        let players = room.players.clone();
        let race_over = room.race().is_some() && room.all_finished();
        self.send_room(room_id, Message::UpdatePlayers { players });
        self.broadcast_rooms();

        // The last unfinished player walking out should not leave the rest
        // waiting on the deadline timer.
        if race_over {
            self.finish_race(room_id);
            return None;
        }
        self.maybe_start(room_id)
    }

    #[instrument(skip(self))]
    fn toggle_ready(&mut self, username: &str, room_id: &str) -> Option<Deadline> {
        let room = self.rooms.get_mut(room_id)?;
        let player = room.player_mut(username)?;
        player.toggle_ready();
        let players = room.players.clone();

        self.send_room(room_id, Message::UpdatePlayers { players });
        self.maybe_start(room_id)
    }

    #[instrument(skip(self))]
    fn update_progress(&mut self, username: &str, room_id: &str, percentage: u8) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.race().is_none() {
            return;
        }
        let Some(player) = room.player_mut(username) else {
            return;
        };

        // Reject out-of-range and regressive reports; progress within one
        // race only moves forward.
        if percentage > 100 || percentage < player.progress {
            tracing::debug!(percentage, "Dropping invalid progress report");
            return;
        }
        player.set_progress(percentage);

        let players = room.players.clone();
        self.send_room(room_id, Message::UpdateProgress { players });
    }

    #[instrument(skip(self))]
    fn finished(&mut self, username: &str, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.race().is_none() || !room.contains(username) {
            return;
        }
        if !room.record_finish(username) {
            // Duplicate finish signal from the same client
            return;
        }
        tracing::info!(place = room.winners.len(), "Player finished");

        if room.all_finished() {
            self.finish_race(room_id);
        }
    }

    #[instrument(skip(self))]
    fn end_game(&mut self, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.reset();
        let players = room.players.clone();

        self.send_room(room_id, Message::UpdatePlayers { players });
        self.broadcast_rooms();
    }

    #[instrument(skip(self))]
    fn race_deadline(&mut self, room_id: &str, race: u64) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        if room.race() != Some(race) {
            return;
        }
        tracing::info!("Race deadline reached");
        self.finish_race(room_id);
    }

    /// Starts a race if the room is eligible: no race already running, more
    /// than one member, and every member ready. Draws the race text (one
    /// draw per start) and hands the run loop a deadline to schedule.
    fn maybe_start(&mut self, room_id: &str) -> Option<Deadline> {
        let room = self.rooms.get_mut(room_id)?;
        if room.race().is_some() || room.players.len() < 2 || !room.all_ready() {
            return None;
        }

        let race = room.start_race();
        let text = self
            .texts
            .choose(&mut thread_rng())
            .copied()
            .expect("race text pool is never empty");
        tracing::info!(room_id, race, "Race starting");

        self.send_room(
            room_id,
            Message::StartGame {
                text: text.to_owned(),
            },
        );
        // The room just closed, so the lists everyone sees must change too
        self.broadcast_rooms();

        Some(Deadline {
            room_id: room_id.to_owned(),
            race,
            after: Duration::from_secs(self.rules.pre_start_seconds + self.rules.race_seconds),
        })
    }

    fn finish_race(&mut self, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.race().is_none() {
            return;
        }
        room.end_race();
        let winners = room.winners.clone();
        tracing::info!(room_id, ?winners, "Race finished");

        self.send_room(room_id, Message::GameOver { winners });
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use typerace_lib::net::{Message, ProtocolError};
    use typerace_lib::room::RoomState;
    use typerace_lib::GameRules;

    use crate::coordinator::CoordinatorError;

    use super::Coordinator;

    const TEXT: &str = "the quick brown fox jumps over the lazy dog";

    fn rules(room_capacity: usize) -> GameRules {
        GameRules {
            room_capacity,
            pre_start_seconds: 0,
            race_seconds: 0,
        }
    }

    fn setup(room_capacity: usize) -> Coordinator {
        let (tx, rx) = mpsc::channel(8);
        Coordinator::new(rx, tx.downgrade(), rules(room_capacity), &[TEXT])
    }

    fn connect(coordinator: &mut Coordinator, username: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(64);
        coordinator.connect(username.to_owned(), tx).unwrap();
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(m) = rx.try_recv() {
            messages.push(m);
        }
        messages
    }

    /// Shorthand: room "alpha" with bob (creator) and cara joined.
    fn alpha_with_two(
        coordinator: &mut Coordinator,
    ) -> (mpsc::Receiver<Message>, mpsc::Receiver<Message>) {
        let bob = connect(coordinator, "bob");
        let cara = connect(coordinator, "cara");
        coordinator.create_room("bob", "alpha".to_owned());
        coordinator.join_room("cara", "alpha");
        (bob, cara)
    }

    #[test]
    fn connect_sends_config_and_room_list() {
        let mut coordinator = setup(2);
        let mut rx = connect(&mut coordinator, "bob");

        let messages = drain(&mut rx);
        assert_eq!(
            messages[0],
            Message::InitialConfig { rules: rules(2) }
        );
        assert_eq!(messages[1], Message::UpdateRooms { rooms: vec![] });
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let mut coordinator = setup(2);
        let _rx = connect(&mut coordinator, "bob");

        let (tx, _rx2) = mpsc::channel(8);
        assert_eq!(
            coordinator.connect("bob".to_owned(), tx),
            Err(CoordinatorError::UsernameTaken("bob".to_owned()))
        );
        assert_eq!(coordinator.registry.len(), 1);
    }

    #[test]
    fn room_fills_and_closes() {
        let mut coordinator = setup(2);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);

        let room = coordinator.rooms.get("alpha").unwrap();
        assert_eq!(room.players.len(), 2);
        assert_eq!(room.state, RoomState::Closed);

        // The creator got a direct confirmation and saw the occupancy grow
        let messages = drain(&mut bob);
        assert!(messages.contains(&Message::RoomCreated {
            room_id: "alpha".to_owned()
        }));
        let last_rooms = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::UpdateRooms { rooms } => Some(rooms.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_rooms.len(), 1);
        assert_eq!(last_rooms[0].occupancy, 2);
        assert!(!last_rooms[0].joinable);
    }

    #[test]
    fn duplicate_room_name_is_rejected() {
        let mut coordinator = setup(3);
        let _bob = connect(&mut coordinator, "bob");
        let mut cara = connect(&mut coordinator, "cara");
        coordinator.create_room("bob", "alpha".to_owned());

        drain(&mut cara);
        coordinator.create_room("cara", "alpha".to_owned());

        assert_eq!(drain(&mut cara), vec![Message::RoomNotCreated]);
        // The existing room is untouched
        let room = coordinator.rooms.get("alpha").unwrap();
        assert_eq!(room.players.len(), 1);
        assert!(room.contains("bob"));
    }

    #[test]
    fn join_closed_room_is_refused() {
        let mut coordinator = setup(2);
        let _ = alpha_with_two(&mut coordinator);
        let mut dave = connect(&mut coordinator, "dave");

        drain(&mut dave);
        assert_eq!(coordinator.join_room("dave", "alpha"), None);

        let messages = drain(&mut dave);
        assert!(matches!(
            messages.as_slice(),
            [Message::Error { .. }]
        ));
        assert_eq!(coordinator.rooms.get("alpha").unwrap().players.len(), 2);
    }

    #[test]
    fn joining_twice_is_refused() {
        let mut coordinator = setup(3);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);

        drain(&mut bob);
        assert_eq!(coordinator.join_room("bob", "alpha"), None);

        let messages = drain(&mut bob);
        assert!(matches!(messages.as_slice(), [Message::Error { .. }]));
        assert_eq!(coordinator.rooms.get("alpha").unwrap().players.len(), 2);
    }

    #[test]
    fn member_cannot_create_second_room() {
        let mut coordinator = setup(3);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);

        drain(&mut bob);
        coordinator.create_room("bob", "beta".to_owned());

        assert_eq!(
            drain(&mut bob),
            vec![Message::Error {
                error: ProtocolError::AlreadyInRoom("alpha".to_owned()),
            }]
        );
        assert!(!coordinator.rooms.contains_key("beta"));

        // With a single room per player, a disconnect leaves no ghost member
        coordinator.disconnect("bob");
        assert!(coordinator.rooms.values().all(|r| !r.contains("bob")));
    }

    #[test]
    fn member_cannot_join_second_room() {
        let mut coordinator = setup(3);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        let _dave = connect(&mut coordinator, "dave");
        coordinator.create_room("dave", "beta".to_owned());

        drain(&mut bob);
        assert_eq!(coordinator.join_room("bob", "beta"), None);

        assert_eq!(
            drain(&mut bob),
            vec![Message::Error {
                error: ProtocolError::AlreadyInRoom("alpha".to_owned()),
            }]
        );
        assert!(!coordinator.rooms.get("beta").unwrap().contains("bob"));
        assert!(coordinator.rooms.get("alpha").unwrap().contains("bob"));
    }

    #[test]
    fn unknown_room_events_are_ignored() {
        let mut coordinator = setup(2);
        let mut bob = connect(&mut coordinator, "bob");

        drain(&mut bob);
        assert_eq!(coordinator.join_room("bob", "nowhere"), None);
        assert_eq!(coordinator.leave_room("bob", "nowhere"), None);
        assert_eq!(coordinator.toggle_ready("bob", "nowhere"), None);
        coordinator.update_progress("bob", "nowhere", 50);
        coordinator.finished("bob", "nowhere");
        coordinator.end_game("nowhere");

        assert!(drain(&mut bob).is_empty());
    }

    #[test]
    fn non_member_events_are_ignored() {
        let mut coordinator = setup(3);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        let _dave = connect(&mut coordinator, "dave");

        drain(&mut bob);
        assert_eq!(coordinator.toggle_ready("dave", "alpha"), None);
        assert_eq!(coordinator.leave_room("dave", "alpha"), None);
        coordinator.finished("dave", "alpha");

        assert!(drain(&mut bob).is_empty());
    }

    #[test]
    fn last_player_ready_does_not_start_alone() {
        // Scenario: bob is ready, cara is not; cara leaves. Everyone left is
        // ready, but a single player never races.
        let mut coordinator = setup(3);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");

        drain(&mut bob);
        assert_eq!(coordinator.leave_room("cara", "alpha"), None);

        let room = coordinator.rooms.get("alpha").unwrap();
        assert!(room.all_ready());
        assert!(room.race().is_none());
        assert!(!drain(&mut bob)
            .iter()
            .any(|m| matches!(m, Message::StartGame { .. })));
    }

    #[test]
    fn race_starts_when_all_ready() {
        let mut coordinator = setup(2);
        let (mut bob, mut cara) = alpha_with_two(&mut coordinator);

        assert_eq!(coordinator.toggle_ready("bob", "alpha"), None);
        let deadline = coordinator
            .toggle_ready("cara", "alpha")
            .expect("second ready-up must trigger the race");
        assert_eq!(deadline.room_id, "alpha");

        let room = coordinator.rooms.get("alpha").unwrap();
        assert_eq!(room.race(), Some(deadline.race));
        assert_eq!(room.state, RoomState::Closed);

        // Exactly one StartGame per member, with the single drawn text
        for rx in [&mut bob, &mut cara] {
            let starts: Vec<_> = drain(rx)
                .into_iter()
                .filter(|m| matches!(m, Message::StartGame { .. }))
                .collect();
            assert_eq!(
                starts,
                vec![Message::StartGame {
                    text: TEXT.to_owned()
                }]
            );
        }
    }

    #[test]
    fn leave_of_unready_player_starts_race() {
        let mut coordinator = setup(3);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        let _dave_rx = {
            let rx = connect(&mut coordinator, "dave");
            coordinator.join_room("dave", "alpha");
            rx
        };
        coordinator.toggle_ready("bob", "alpha");
        coordinator.toggle_ready("cara", "alpha");
        assert!(coordinator.rooms.get("alpha").unwrap().race().is_none());

        drain(&mut bob);
        let deadline = coordinator
            .leave_room("dave", "alpha")
            .expect("remaining members are all ready");
        assert_eq!(deadline.room_id, "alpha");
        assert!(drain(&mut bob)
            .iter()
            .any(|m| matches!(m, Message::StartGame { .. })));
    }

    #[test]
    fn progress_is_bounded_and_monotonic() {
        let mut coordinator = setup(2);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);

        // No race yet: reports are dropped
        coordinator.update_progress("bob", "alpha", 10);
        assert_eq!(
            coordinator.rooms.get("alpha").unwrap().players[0].progress,
            0
        );

        coordinator.toggle_ready("bob", "alpha");
        coordinator.toggle_ready("cara", "alpha");
        drain(&mut bob);

        coordinator.update_progress("bob", "alpha", 40);
        let updates = drain(&mut bob);
        assert!(matches!(
            updates.as_slice(),
            [Message::UpdateProgress { players }] if players[0].progress == 40
        ));

        // Regressive and out-of-range reports are dropped silently
        coordinator.update_progress("bob", "alpha", 30);
        coordinator.update_progress("bob", "alpha", 101);
        assert!(drain(&mut bob).is_empty());
        assert_eq!(
            coordinator.rooms.get("alpha").unwrap().players[0].progress,
            40
        );
    }

    #[test]
    fn finish_order_and_single_game_over() {
        let mut coordinator = setup(2);
        let (mut bob, mut cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");
        coordinator.toggle_ready("cara", "alpha");
        drain(&mut bob);
        drain(&mut cara);

        coordinator.finished("cara", "alpha");
        assert!(drain(&mut bob).is_empty(), "game is not over yet");

        // A duplicate finish must not end the game early for bob
        coordinator.finished("cara", "alpha");
        assert!(drain(&mut bob).is_empty());

        coordinator.finished("bob", "alpha");
        let over = Message::GameOver {
            winners: vec!["cara".to_owned(), "bob".to_owned()],
        };
        assert_eq!(drain(&mut bob), vec![over.clone()]);
        assert_eq!(drain(&mut cara), vec![over]);
        assert!(coordinator.rooms.get("alpha").unwrap().race().is_none());

        // Finishing again after the race is over does nothing
        coordinator.finished("cara", "alpha");
        assert!(drain(&mut bob).is_empty());
    }

    #[test]
    fn rematch_without_end_game_starts_clean() {
        let mut coordinator = setup(2);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");
        coordinator.toggle_ready("cara", "alpha");
        coordinator.update_progress("bob", "alpha", 100);
        coordinator.finished("bob", "alpha");
        coordinator.finished("cara", "alpha");

        // Nobody acknowledges the result; everyone is still flagged ready,
        // so one toggle off and on re-arms the room for a rematch.
        coordinator.toggle_ready("bob", "alpha");
        drain(&mut bob);
        let deadline = coordinator
            .toggle_ready("bob", "alpha")
            .expect("all members ready again");

        let room = coordinator.rooms.get("alpha").unwrap();
        assert_eq!(room.race(), Some(deadline.race));
        assert!(room.winners.is_empty());
        assert!(room.players.iter().all(|p| p.progress == 0));

        // The rematch produces its own finish order, not a replay
        coordinator.finished("cara", "alpha");
        coordinator.finished("bob", "alpha");
        let over: Vec<_> = drain(&mut bob)
            .into_iter()
            .filter(|m| matches!(m, Message::GameOver { .. }))
            .collect();
        assert_eq!(
            over,
            vec![Message::GameOver {
                winners: vec!["cara".to_owned(), "bob".to_owned()],
            }]
        );
    }

    #[test]
    fn stale_deadline_is_ignored() {
        let mut coordinator = setup(2);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");
        let deadline = coordinator.toggle_ready("cara", "alpha").unwrap();

        coordinator.finished("bob", "alpha");
        coordinator.finished("cara", "alpha");
        drain(&mut bob);

        // The race already ended; its deadline must not fire a second result
        coordinator.race_deadline("alpha", deadline.race);
        assert!(drain(&mut bob).is_empty());
    }

    #[test]
    fn deadline_ends_running_race() {
        let mut coordinator = setup(2);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");
        let deadline = coordinator.toggle_ready("cara", "alpha").unwrap();

        coordinator.finished("cara", "alpha");
        drain(&mut bob);
        coordinator.race_deadline("alpha", deadline.race);

        let messages = drain(&mut bob);
        assert_eq!(
            messages,
            vec![Message::GameOver {
                winners: vec!["cara".to_owned()],
            }]
        );
    }

    #[test]
    fn end_game_resets_room() {
        let mut coordinator = setup(2);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");
        coordinator.toggle_ready("cara", "alpha");
        coordinator.update_progress("bob", "alpha", 100);
        coordinator.finished("bob", "alpha");
        coordinator.finished("cara", "alpha");

        drain(&mut bob);
        coordinator.end_game("alpha");

        let room = coordinator.rooms.get("alpha").unwrap();
        assert!(room.winners.is_empty());
        assert!(room.race().is_none());
        assert!(room
            .players
            .iter()
            .all(|p| !p.ready && p.progress == 0));
        // Still at capacity, so the room stays closed to joiners
        assert_eq!(room.state, RoomState::Closed);

        let messages = drain(&mut bob);
        assert!(messages
            .iter()
            .any(|m| matches!(m, Message::UpdatePlayers { .. })));
    }

    #[test]
    fn finisher_leaving_is_forgotten() {
        let mut coordinator = setup(3);
        let (mut bob, _cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");
        coordinator.toggle_ready("cara", "alpha");
        coordinator.finished("cara", "alpha");

        drain(&mut bob);
        coordinator.leave_room("cara", "alpha");

        let room = coordinator.rooms.get("alpha").unwrap();
        assert!(room.winners.is_empty());
        // bob alone, unfinished: the race keeps running until the deadline
        assert!(room.race().is_some());
    }

    #[test]
    fn last_unfinished_player_leaving_ends_race() {
        let mut coordinator = setup(3);
        let (mut bob, mut cara) = alpha_with_two(&mut coordinator);
        coordinator.toggle_ready("bob", "alpha");
        coordinator.toggle_ready("cara", "alpha");
        coordinator.finished("cara", "alpha");

        drain(&mut cara);
        coordinator.leave_room("bob", "alpha");
        drop(bob);

        let messages = drain(&mut cara);
        assert!(messages.contains(&Message::GameOver {
            winners: vec!["cara".to_owned()],
        }));
        assert!(coordinator.rooms.get("alpha").unwrap().race().is_none());
    }

    #[test]
    fn disconnect_equals_leave() {
        let mut leave = setup(3);
        let _ = alpha_with_two(&mut leave);
        leave.leave_room("cara", "alpha");

        let mut disconnect = setup(3);
        let _ = alpha_with_two(&mut disconnect);
        disconnect.disconnect("cara");

        let left = leave.rooms.get("alpha").unwrap();
        let dropped = disconnect.rooms.get("alpha").unwrap();
        assert_eq!(left.players, dropped.players);
        assert_eq!(left.state, dropped.state);
        assert_eq!(left.winners, dropped.winners);

        // Disconnecting additionally frees the display name
        assert!(leave.registry.contains_key("cara"));
        assert!(!disconnect.registry.contains_key("cara"));
    }

    #[test]
    fn empty_room_is_destroyed() {
        let mut coordinator = setup(3);
        let (_bob, mut cara) = alpha_with_two(&mut coordinator);
        coordinator.disconnect("bob");

        drain(&mut cara);
        coordinator.disconnect("cara");
        assert!(coordinator.rooms.is_empty());
        assert!(coordinator.registry.is_empty());
    }

    #[tokio::test]
    async fn scheduled_deadline_ends_stalled_race() {
        let handle = crate::coordinator::start(rules(2));

        let (bob_tx, mut bob_rx) = mpsc::channel(64);
        let bob = handle.connect("bob", bob_tx).await.unwrap();
        let (cara_tx, _cara_rx) = mpsc::channel(64);
        let cara = handle.connect("cara", cara_tx).await.unwrap();

        bob.create_room("alpha").await.unwrap();
        cara.join_room("alpha").await.unwrap();
        bob.toggle_ready("alpha").await.unwrap();
        cara.toggle_ready("alpha").await.unwrap();

        // Nobody types a single word; the zero-length timer ends the race
        let game_over = timeout(Duration::from_secs(5), async {
            loop {
                match bob_rx.recv().await {
                    Some(Message::GameOver { winners }) => break winners,
                    Some(_) => continue,
                    None => panic!("connection channel closed before GameOver"),
                }
            }
        })
        .await
        .expect("deadline never fired");
        assert!(game_over.is_empty());
    }
}
