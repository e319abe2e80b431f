//! Error types for the chat relay
//!
//! Defines application-level errors and outbound delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::AnyDelimiterCodecError;

/// Application-level errors
///
/// Connection-scoped variants end one session only; startup variants
/// (config, bind) are fatal to the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on a socket or the transcript file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (includes over-long lines)
    #[error("Line codec error: {0}")]
    Codec(#[from] AnyDelimiterCodecError),

    /// Config file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Listen address argument is neither a port nor host:port
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    /// Channel send error (fatal - relay task is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// The relay stopped before answering a request
    #[error("Server closed")]
    ServerClosed,
}

/// Outbound delivery errors
///
/// Returned when a line cannot be queued for one recipient. Never fatal
/// to the sender or to other recipients.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The recipient's outbound queue is full
    #[error("Outbound queue full")]
    Full,
}
