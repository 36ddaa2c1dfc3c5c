use tokio::sync::{mpsc, oneshot};
use typerace_lib::net::Message;

use super::actor::Action;
use super::{CoordinatorError, CoordinatorResult};

/// Cloneable entry point into the coordinator, held by the accept loop.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    pub(super) sender: mpsc::Sender<Action>,
}

impl CoordinatorHandle {
    /// Registers `username` and the connection's outbound channel with the
    /// coordinator. Fails when the name is already online.
    pub async fn connect(
        &self,
        username: &str,
        outbound: mpsc::Sender<Message>,
    ) -> CoordinatorResult<ClientHandle> {
        let (tx, rx) = oneshot::channel();
        let msg = Action::Connect {
            respond_to: tx,
            username: username.to_owned(),
            sender: outbound,
        };
        // Ignore the first error; if sending failed, rx.await fails as well
        // since its sender has been dropped
        let _ = self.sender.send(msg).await;
        rx.await.unwrap_or(Err(CoordinatorError::Shutdown))?;

        Ok(ClientHandle {
            sender: self.sender.clone(),
            username: username.to_owned(),
        })
    }
}

/// Handle for one connected player. Every in-game event the connection
/// produces goes through here, stamped with the connection's identity.
///
/// Dropping the handle disconnects the player, so transport teardown and an
/// explicit leave share a single code path inside the coordinator.
#[derive(Debug)]
pub struct ClientHandle {
    sender: mpsc::Sender<Action>,
    username: String,
}

impl ClientHandle {
    pub fn username(&self) -> &str {
        &self.username
    }

    async fn send(&self, msg: Action) -> CoordinatorResult<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| CoordinatorError::Shutdown)
    }

    pub async fn create_room(&self, name: impl Into<String>) -> CoordinatorResult<()> {
        self.send(Action::CreateRoom {
            username: self.username.clone(),
            name: name.into(),
        })
        .await
    }

    pub async fn join_room(&self, room_id: impl Into<String>) -> CoordinatorResult<()> {
        self.send(Action::JoinRoom {
            username: self.username.clone(),
            room_id: room_id.into(),
        })
        .await
    }

    pub async fn leave_room(&self, room_id: impl Into<String>) -> CoordinatorResult<()> {
        self.send(Action::LeaveRoom {
            username: self.username.clone(),
            room_id: room_id.into(),
        })
        .await
    }

    pub async fn toggle_ready(&self, room_id: impl Into<String>) -> CoordinatorResult<()> {
        self.send(Action::ToggleReady {
            username: self.username.clone(),
            room_id: room_id.into(),
        })
        .await
    }

    pub async fn update_progress(
        &self,
        room_id: impl Into<String>,
        percentage: u8,
    ) -> CoordinatorResult<()> {
        self.send(Action::UpdateProgress {
            username: self.username.clone(),
            room_id: room_id.into(),
            percentage,
        })
        .await
    }

    pub async fn finished(&self, room_id: impl Into<String>) -> CoordinatorResult<()> {
        self.send(Action::Finished {
            username: self.username.clone(),
            room_id: room_id.into(),
        })
        .await
    }

    pub async fn end_game(&self, room_id: impl Into<String>) -> CoordinatorResult<()> {
        self.send(Action::EndGame {
            room_id: room_id.into(),
        })
        .await
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let tx = self.sender.clone();
        let username = std::mem::take(&mut self.username);
        tokio::spawn(async move {
            if let Err(e) = tx.send(Action::Disconnect { username }).await {
                tracing::warn!(%e, "Failed to disconnect player from the coordinator.");
            }
        });
    }
}
