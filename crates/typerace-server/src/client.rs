use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;
use typerace_lib::net::connection::{self, ConnectionRx, ConnectionTx};
use typerace_lib::net::{GameMessage, Message, ProtocolError};
use typerace_lib::PROTOCOL_VERSION;

use crate::coordinator::{ClientHandle, CoordinatorError, CoordinatorHandle, CoordinatorResult};

/// Take a socket for a newly connected client and begin serving it.
pub async fn handle_new_connection(coordinator: CoordinatorHandle, socket: TcpStream) {
    let client = match ConnectingClient::new(coordinator, socket).handshake().await {
        Some(c) => c,
        None => return,
    };
    client.run().await;
}

/// A client that has opened a socket but not yet identified itself.
struct ConnectingClient {
    coordinator: CoordinatorHandle,
    conn_tx: ConnectionTx,
    conn_rx: ConnectionRx,
}

/// Everything the handshake produces for a fully connected client: its
/// coordinator handle, a sender for locally generated frames, and the
/// receiver carrying everything the coordinator addresses to it.
type Handshake = (ClientHandle, mpsc::Sender<Message>, mpsc::Receiver<Message>);

impl ConnectingClient {
    fn new(coordinator: CoordinatorHandle, socket: TcpStream) -> Self {
        let (conn_tx, conn_rx) = connection::from_socket(socket);
        Self {
            coordinator,
            conn_tx,
            conn_rx,
        }
    }

    async fn handshake(mut self) -> Option<PlayerClient> {
        match self.try_handshake().await {
            Ok(parts) => Some(PlayerClient::from_connecting(self, parts)),
            Err(reply) => {
                tracing::warn!(?reply, "Handshake failed");
                let _ = self.conn_tx.write_frame(reply).await;
                None
            }
        }
    }

    /// Runs the handshake; on failure returns the frame to refuse the
    /// client with.
    async fn try_handshake(&mut self) -> Result<Handshake, Message> {
        let (version, username) = match self.conn_rx.read_frame().await {
            Ok(Some(Message::Hello { version, username })) => (version, username),
            Ok(Some(_)) => {
                return Err(Message::Error {
                    error: ProtocolError::InvalidMessage,
                })
            }
            Ok(None) => {
                return Err(Message::Error {
                    error: ProtocolError::Disconnected,
                })
            }
            Err(e) => {
                return Err(Message::Error {
                    error: ProtocolError::Message(e.to_string()),
                })
            }
        };

        if version != PROTOCOL_VERSION {
            return Err(Message::Error {
                error: ProtocolError::VersionMismatch(version, PROTOCOL_VERSION.to_owned()),
            });
        }

        let (out_tx, out_rx) = mpsc::channel(64);
        let handle = match self.coordinator.connect(&username, out_tx.clone()).await {
            Ok(handle) => handle,
            Err(CoordinatorError::UsernameTaken(_)) => return Err(Message::UsernameAlreadyExists),
            Err(CoordinatorError::Shutdown) => {
                return Err(Message::Error {
                    error: ProtocolError::Disconnected,
                })
            }
        };

        tracing::info!(%username, "New connection accepted");
        Ok((handle, out_tx, out_rx))
    }
}

/// Forwards everything addressed to this connection onto the socket.
async fn send_task(mut conn_tx: ConnectionTx, mut outbound_rx: mpsc::Receiver<Message>) {
    while let Some(m) = outbound_rx.recv().await {
        if conn_tx.write_frame(m).await.is_err() {
            return;
        }
    }
}

/// A fully connected player.
struct PlayerClient {
    conn_rx: ConnectionRx,
    local_tx: mpsc::Sender<Message>,
    task_handle: JoinHandle<()>,
    handle: ClientHandle,
}

impl PlayerClient {
    fn from_connecting(client: ConnectingClient, (handle, local_tx, out_rx): Handshake) -> Self {
        let task_handle = tokio::spawn(send_task(client.conn_tx, out_rx));

        PlayerClient {
            conn_rx: client.conn_rx,
            local_tx,
            task_handle,
            handle,
        }
    }

    /// Takes ownership of self to guarantee that the client is dropped (and
    /// thereby disconnected) when its message loop ends.
    #[instrument(skip_all, fields(username = %self.handle.username()))]
    async fn run(mut self) {
        loop {
            let incoming = match self.conn_rx.read_frame().await {
                Ok(Some(Message::Game(x))) => x,
                Ok(Some(m)) => {
                    tracing::error!("Invalid message received: {m:?}");
                    let _ = self
                        .local_tx
                        .send(Message::Error {
                            error: ProtocolError::InvalidMessage,
                        })
                        .await;
                    continue;
                }
                Ok(None) => {
                    break;
                }
                Err(e) => {
                    tracing::error!("Error reading message, Closing connection\n{e:?}");
                    break;
                }
            };

            tracing::debug!("Received message: {incoming:?}");
            if let Err(e) = self.process(incoming).await {
                // Only fails when the coordinator itself is gone
                tracing::error!("Encountered error processing message: {e:?}");
                break;
            }
        }
        tracing::info!("Connection closed");
    }

    async fn process(&mut self, msg: GameMessage) -> CoordinatorResult<()> {
        match msg {
            GameMessage::CreateRoom { name } => self.handle.create_room(name).await,
            GameMessage::JoinRoom { room_id } => self.handle.join_room(room_id).await,
            GameMessage::LeaveRoom { room_id } => self.handle.leave_room(room_id).await,
            GameMessage::ToggleReady { room_id } => self.handle.toggle_ready(room_id).await,
            GameMessage::UpdateProgress {
                room_id,
                percentage,
            } => self.handle.update_progress(room_id, percentage).await,
            GameMessage::Finished { room_id } => self.handle.finished(room_id).await,
            GameMessage::EndGame { room_id } => self.handle.end_game(room_id).await,
        }
    }
}

impl Drop for PlayerClient {
    fn drop(&mut self) {
        self.task_handle.abort();
        // self.handle's own Drop tells the coordinator to disconnect us
    }
}
