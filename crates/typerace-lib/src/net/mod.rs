pub use error::{FrameError, ProtocolError};
pub use message::{GameMessage, Message};

pub mod connection;
mod error;
mod message;
