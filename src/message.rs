//! Wire protocol definitions
//!
//! Newline-delimited UTF-8 text in both directions. Inbound lines are
//! parsed into a [`Command`]; outbound lines are rendered from a
//! [`ServerMessage`]. Chat content is formatted once as a [`ChatLine`] and
//! shared by every recipient and the transcript.

use std::fmt;
use std::sync::Arc;

use chrono::Local;

/// Label used for join/leave notices
pub const SYSTEM_LABEL: &str = "Server";

/// Timestamp layout, sortable at second resolution
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Client → Server line, after interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/quit`, any case
    Quit,
    /// `/list`, any case
    List,
    /// `/pm <user> <message>`
    PrivateMessage { to: String, body: String },
    /// `/pm` without both a recipient and a message
    InvalidPrivateMessage,
    /// Anything else with visible content
    Chat(String),
    /// Blank or whitespace-only line
    Empty,
}

impl Command {
    /// Interpret one inbound line
    pub fn parse(line: &str) -> Self {
        if line.trim().is_empty() {
            return Command::Empty;
        }
        if line.eq_ignore_ascii_case("/quit") {
            return Command::Quit;
        }
        if line.eq_ignore_ascii_case("/list") {
            return Command::List;
        }
        if line == "/pm" {
            return Command::InvalidPrivateMessage;
        }
        if line.starts_with("/pm ") {
            // At most three tokens so the body keeps its spaces
            let mut parts = line.splitn(3, ' ').skip(1);
            return match (parts.next(), parts.next()) {
                (Some(to), Some(body)) if !to.is_empty() && !body.is_empty() => {
                    Command::PrivateMessage {
                        to: to.to_string(),
                        body: body.to_string(),
                    }
                }
                _ => Command::InvalidPrivateMessage,
            };
        }
        Command::Chat(line.to_string())
    }
}

/// One formatted chat line: `<timestamp> [<label>]: <body>`
///
/// Rendered once per event; the same text goes to every recipient and to
/// the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine(Arc<str>);

impl ChatLine {
    /// Format a line with an explicit timestamp
    pub fn format(timestamp: &str, label: &str, body: &str) -> Self {
        Self(Arc::from(format!("{} [{}]: {}", timestamp, label, body)))
    }

    /// Format a line stamped with the server's local clock
    pub fn now(label: &str, body: &str) -> Self {
        Self::format(&timestamp(), label, body)
    }

    /// Broadcast from a user
    pub fn broadcast(from: &str, body: &str) -> Self {
        Self::now(from, body)
    }

    /// Private message, labelled `<from> -> <to>`
    pub fn private(from: &str, to: &str, body: &str) -> Self {
        Self::now(&format!("{} -> {}", from, to), body)
    }

    /// Join/leave notice
    pub fn notice(body: &str) -> Self {
        Self::now(SYSTEM_LABEL, body)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current local time in [`TIMESTAMP_FORMAT`]
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Server → Client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// First login prompt
    Prompt,
    /// Login prompt after an empty or taken name
    Retry,
    /// Registration succeeded
    Welcome { username: String },
    /// Broadcast, private message or notice
    Chat(ChatLine),
    /// Reply to `/list`
    UserList(Vec<String>),
    /// `/pm` recipient is not connected
    UserNotFound { username: String },
    /// Malformed `/pm`
    PmUsage,
    /// Connection is about to close
    Closed,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Prompt => f.write_str("Enter username:"),
            ServerMessage::Retry => f.write_str("Invalid or taken. Enter username:"),
            ServerMessage::Welcome { username } => write!(
                f,
                "Welcome {}! Commands: /quit, /list, /pm <user> <message>",
                username
            ),
            ServerMessage::Chat(line) => line.fmt(f),
            ServerMessage::UserList(names) => write!(f, "Users: {}", names.join(", ")),
            ServerMessage::UserNotFound { username } => {
                write!(f, "{}: user '{}' not found", SYSTEM_LABEL, username)
            }
            ServerMessage::PmUsage => f.write_str("Invalid /pm usage. Use: /pm username message"),
            ServerMessage::Closed => f.write_str("[SYSTEM]Connection closed."),
        }
    }
}
