use thiserror::Error;
use tokio::sync::mpsc;
use typerace_lib::GameRules;

use crate::texts;

use self::actor::Coordinator;

mod actor;
pub mod handle;

pub use handle::{ClientHandle, CoordinatorHandle};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Username '{0}' is already connected")]
    UsernameTaken(String),
    #[error("The coordinator is no longer running")]
    Shutdown,
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Spawns the event coordinator and returns the handle connections use to
/// feed events into it.
///
/// The coordinator exclusively owns the room directory and the player
/// registry; every mutation happens inside its event loop, one event at a
/// time.
pub fn start(rules: GameRules) -> CoordinatorHandle {
    let (sender, receiver) = mpsc::channel(256);
    let actor = Coordinator::new(receiver, sender.downgrade(), rules, texts::RACE_TEXTS);
    tokio::spawn(actor.run());

    CoordinatorHandle { sender }
}
