//! ChatServer Actor implementation
//!
//! The central actor that owns the session registry and the transcript.
//! Connection handlers talk to it over an mpsc channel, so registration,
//! removal and routing are applied one at a time in arrival order.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::message::{Command, ServerMessage};
use crate::registry::Registry;
use crate::router::{self, Router};
use crate::session::Session;
use crate::transcript::Transcript;
use crate::types::{SessionId, Username};

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// Claim a username; the reply is false if it is taken
    Register {
        session: Session,
        reply: oneshot::Sender<bool>,
    },
    /// Connection closed
    Unregister {
        username: Username,
        session_id: SessionId,
    },
    /// Inbound line from a registered session
    Line {
        username: Username,
        session_id: SessionId,
        command: Command,
    },
    /// Stop processing and close the transcript
    Shutdown,
}

/// The main ChatServer actor
pub struct ChatServer {
    /// Connected sessions by username
    registry: Registry,
    /// Single serialisation point for persisted lines
    transcript: Transcript,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver and transcript
    pub fn new(receiver: mpsc::Receiver<ServerCommand>, transcript: Transcript) -> Self {
        Self {
            registry: Registry::new(),
            transcript,
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Processes commands until `Shutdown` arrives or all senders are
    /// dropped, then flushes and closes the transcript.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            if let ServerCommand::Shutdown = cmd {
                break;
            }
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");

        // Sessions still registered at this point outlived the grace period
        for session in self.registry.drain() {
            if session.is_alive() {
                debug!("Closing lingering session {}", session.username);
                let _ = session.deliver(ServerMessage::Closed);
            }
        }

        let health = self.transcript.health();
        self.transcript.close().await;
        if !health.is_healthy() {
            warn!(
                "Transcript degraded: {} write failures, {} dropped lines",
                health.write_failures(),
                health.dropped()
            );
        }
        info!("ChatServer stopped");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Register { session, reply } => {
                self.handle_register(session, reply);
            }
            ServerCommand::Unregister {
                username,
                session_id,
            } => {
                self.handle_unregister(username, session_id);
            }
            ServerCommand::Line {
                username,
                session_id,
                command,
            } => {
                self.handle_line(username, session_id, command);
            }
            ServerCommand::Shutdown => {}
        }
    }

    /// Register and announce as one step
    ///
    /// The name is in the registry before the join notice is built, and no
    /// other command can observe one without the other.
    fn handle_register(&mut self, session: Session, reply: oneshot::Sender<bool>) {
        let username = session.username.clone();
        let id = session.id;

        if !self.registry.register(session.clone()) {
            debug!("Username '{}' already taken", username);
            let _ = reply.send(false);
            return;
        }

        if reply.send(true).is_err() {
            // Handler went away while waiting; undo without announcing
            self.registry.unregister(username.as_str(), id);
            debug!("Session {} vanished during login", id);
            return;
        }

        info!(
            "Session {} registered as '{}' from {}",
            id, username, session.peer_addr
        );
        router::deliver(
            &session,
            ServerMessage::Welcome {
                username: username.to_string(),
            },
        );
        Router::new(&self.registry, &self.transcript).announce_join(username.as_str());
        debug!("Total sessions: {}", self.registry.len());
    }

    /// Remove a session; announce only if it was actually present
    fn handle_unregister(&mut self, username: Username, session_id: SessionId) {
        if !self.registry.unregister(username.as_str(), session_id) {
            debug!("Session {} ('{}') already unregistered", session_id, username);
            return;
        }

        info!("Session {} ('{}') unregistered", session_id, username);
        Router::new(&self.registry, &self.transcript).announce_leave(username.as_str());
        debug!("Total sessions: {}", self.registry.len());
    }

    /// Route a line from a registered session
    fn handle_line(&mut self, username: Username, session_id: SessionId, command: Command) {
        let Some(session) = self.registry.lookup(username.as_str()) else {
            debug!("Dropping line from unregistered '{}'", username);
            return;
        };
        if session.id != session_id {
            debug!("Dropping line from stale session {}", session_id);
            return;
        }

        Router::new(&self.registry, &self.transcript).route(session, command);
    }
}
