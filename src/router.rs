//! Message routing rules
//!
//! Stateless logic over the registry and the transcript: decides who gets
//! each line and whether it is persisted. Called only from the relay
//! actor, so one routing decision completes before the next begins and
//! transcript order matches delivery order.

use tracing::{debug, info, warn};

use crate::error::SendError;
use crate::message::{ChatLine, Command, ServerMessage};
use crate::registry::Registry;
use crate::session::Session;
use crate::transcript::Transcript;

/// Borrowed view of the relay state used to route one line
pub struct Router<'a> {
    registry: &'a Registry,
    transcript: &'a Transcript,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a Registry, transcript: &'a Transcript) -> Self {
        Self {
            registry,
            transcript,
        }
    }

    /// Apply one parsed command from `from`
    pub fn route(&self, from: &Session, command: Command) {
        match command {
            // Terminates the connection, handled by the session loop
            Command::Quit => {}
            Command::Empty => {
                debug!("Ignoring blank line from {}", from.username);
            }
            Command::List => {
                reply(from, ServerMessage::UserList(self.registry.list_names()));
            }
            Command::PrivateMessage { to, body } => {
                self.private_message(from, &to, &body);
            }
            Command::InvalidPrivateMessage => {
                reply(from, ServerMessage::PmUsage);
            }
            Command::Chat(body) => {
                self.broadcast(ChatLine::broadcast(from.username.as_str(), &body));
            }
        }
    }

    /// Deliver `line` to every registered session and persist it
    ///
    /// Returns how many sessions accepted the line. A recipient that is
    /// full or gone is skipped; the rest still get it.
    pub fn broadcast(&self, line: ChatLine) -> usize {
        let mut delivered = 0;
        for session in self.registry.sessions() {
            if deliver(session, ServerMessage::Chat(line.clone())) {
                delivered += 1;
            }
        }
        self.transcript.append(&line);
        info!("{}", line);
        delivered
    }

    pub fn announce_join(&self, name: &str) -> usize {
        self.broadcast(ChatLine::notice(&format!("{} has joined the chat.", name)))
    }

    pub fn announce_leave(&self, name: &str) -> usize {
        self.broadcast(ChatLine::notice(&format!("{} has left the chat.", name)))
    }

    fn private_message(&self, from: &Session, to: &str, body: &str) {
        let Some(target) = self.registry.lookup(to) else {
            reply(
                from,
                ServerMessage::UserNotFound {
                    username: to.to_string(),
                },
            );
            return;
        };

        let line = ChatLine::private(from.username.as_str(), to, body);
        deliver(target, ServerMessage::Chat(line.clone()));
        // A message to yourself is shown once
        if target.id != from.id {
            deliver(from, ServerMessage::Chat(line.clone()));
        }
        self.transcript.append(&line);
        info!("{}", line);
    }
}

/// Reply to the requesting session only
fn reply(to: &Session, msg: ServerMessage) {
    deliver(to, msg);
}

/// Queue `msg` for one session, logging rather than returning a failure
pub(crate) fn deliver(to: &Session, msg: ServerMessage) -> bool {
    match to.deliver(msg) {
        Ok(()) => true,
        Err(SendError::Full) => {
            warn!("Outbound queue full for {}, dropping line", to.username);
            false
        }
        Err(SendError::ChannelClosed) => {
            debug!("Session {} already closing, skipping line", to.username);
            false
        }
    }
}
