//! Session struct definition
//!
//! Represents one connected, named client and its outbound queue.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{SessionId, Username};

/// A connected client
///
/// The sender feeds a bounded queue drained by the connection's own writer
/// task, which is the only writer to the socket. Sends never wait, so one
/// slow client cannot hold up the relay.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique identifier for this connection
    pub id: SessionId,
    /// Registered display name
    pub username: Username,
    /// Remote address, for logging
    pub peer_addr: SocketAddr,
    /// Relay → connection message channel
    sender: mpsc::Sender<ServerMessage>,
}

impl Session {
    /// Create a new session with the given identity and sender channel
    pub fn new(
        id: SessionId,
        username: Username,
        peer_addr: SocketAddr,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            username,
            peer_addr,
            sender,
        }
    }

    /// Queue a message for this session without waiting
    ///
    /// Fails with `Full` when the writer is behind and `ChannelClosed` once
    /// the connection has gone away.
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Whether the connection's writer is still draining the queue
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}
