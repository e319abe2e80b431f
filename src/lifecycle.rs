//! Server lifecycle
//!
//! Owns the listening socket, the relay actor and the connection tasks.
//! Shutdown sequence, triggered by cancelling the server's token:
//! 1. stop accepting connections and release the listening socket
//! 2. let open sessions observe the signal and close (bounded by a grace period)
//! 3. stop the relay, which flushes and closes the transcript

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::handler::{handle_connection, ConnectionSettings};
use crate::server::{ChatServer, ServerCommand};
use crate::transcript::{Transcript, TranscriptHealth};

/// Pause after a failed accept, so a persistent fault does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound, not yet running relay server
pub struct Server {
    listener: TcpListener,
    transcript: Transcript,
    config: Config,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listener and open the transcript
    ///
    /// Failures here are startup faults: the caller cannot provide service.
    pub async fn bind(config: Config) -> Result<Self, AppError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let transcript =
            Transcript::open(&config.transcript_path, config.transcript_capacity).await?;

        Ok(Self {
            listener,
            transcript,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the server when cancelled
    ///
    /// Safe to cancel from any task, any number of times.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn transcript_health(&self) -> Arc<TranscriptHealth> {
        self.transcript.health()
    }

    /// Accept connections until shutdown, then tear down in order
    pub async fn run(self) -> Result<(), AppError> {
        let Server {
            listener,
            transcript,
            config,
            shutdown,
        } = self;

        info!("Chat relay listening on {}", listener.local_addr()?);

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity.max(1));
        let relay_task = tokio::spawn(ChatServer::new(cmd_rx, transcript).run());

        let settings = ConnectionSettings::from(&config);
        let sessions = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let cmd_tx = cmd_tx.clone();
                        let shutdown = shutdown.clone();
                        sessions.spawn(async move {
                            if let Err(e) = handle_connection(stream, cmd_tx, settings, shutdown).await {
                                warn!("Connection {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        // Unbound now, so late connects are refused instead of sitting in the backlog
        drop(listener);
        info!("Shutting down: no longer accepting connections");
        sessions.close();
        if tokio::time::timeout(config.shutdown_grace(), sessions.wait())
            .await
            .is_err()
        {
            warn!(
                "{} sessions still open after {:?}",
                sessions.len(),
                config.shutdown_grace()
            );
        }

        let _ = cmd_tx.send(ServerCommand::Shutdown).await;
        drop(cmd_tx);
        if let Err(e) = relay_task.await {
            error!("Relay task failed: {}", e);
        }

        info!("Server stopped");
        Ok(())
    }
}
