//! Multi-user TCP Chat Relay Library
//!
//! A line-based chat relay built on tokio. Clients connect over TCP, pick a
//! unique username and exchange newline-delimited UTF-8 text.
//!
//! # Features
//! - Username login with uniqueness enforcement and re-prompting
//! - Broadcast chat to every connected user
//! - Private messages (`/pm <user> <message>`)
//! - User listing (`/list`) and `/quit`
//! - Join/leave notices
//! - Append-only transcript of every delivered chat line
//! - Ordered shutdown
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning the registry and transcript
//! - Each connection has a `handler` task reading lines and a writer task
//!   draining that session's bounded outbound queue
//! - The transcript file is owned by its own writer task
//! - No locks needed - all shared state goes through message passing
//!
//! # Example
//! ```ignore
//! use chat_relay::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_relay::AppError> {
//!     let server = Server::bind(Config::default()).await?;
//!     let shutdown = server.shutdown_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod transcript;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use error::{AppError, SendError};
pub use handler::{handle_connection, ConnectionSettings, ConnectionState};
pub use lifecycle::Server;
pub use message::{ChatLine, Command, ServerMessage};
pub use registry::Registry;
pub use router::Router;
pub use server::{ChatServer, ServerCommand};
pub use session::Session;
pub use transcript::{Transcript, TranscriptHealth};
pub use types::{SessionId, Username};
