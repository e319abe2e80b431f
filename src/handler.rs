//! TCP connection handler
//!
//! Drives one connection through `Connecting → Authenticating → Active →
//! Closed`. Reading happens on the handler task; writing is done by a
//! separate writer task that drains the session's outbound queue, so the
//! relay never waits on this socket.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead, FramedWrite, LinesCodec,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::message::{Command, ServerMessage};
use crate::server::ServerCommand;
use crate::session::Session;
use crate::types::{SessionId, Username};

/// How long cleanup waits for queued lines to reach the peer
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Active,
    Closed,
}

/// Settings a connection needs from the server config
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Per-session outbound queue length
    pub outbound_capacity: usize,
    /// Longest accepted inbound line
    pub max_line_length: usize,
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            outbound_capacity: config.outbound_capacity.max(1),
            max_line_length: config.max_line_length,
        }
    }
}

/// Handle a new TCP connection
///
/// Returns once the connection is closed. Registry cleanup and the leave
/// notice happen on every exit path after a successful login; an error is
/// returned only to be logged.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let peer_addr = stream.peer_addr()?;
    let session_id = SessionId::new();
    trace_state(session_id, ConnectionState::Connecting);

    let (read_half, write_half) = stream.into_split();
    // Split on raw bytes so one bad UTF-8 sequence does not end the session
    let mut lines = FramedRead::new(
        read_half,
        AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            b"\n".to_vec(),
            settings.max_line_length,
        ),
    );

    // Channel for relay -> client messages
    let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(settings.outbound_capacity);
    let write_task = spawn_writer(session_id, write_half, msg_rx);

    trace_state(session_id, ConnectionState::Authenticating);
    let login = authenticate(
        session_id,
        peer_addr,
        &mut lines,
        &msg_tx,
        &cmd_tx,
        &shutdown,
    )
    .await;

    let result = match login {
        Ok(Some(username)) => {
            trace_state(session_id, ConnectionState::Active);
            let result =
                session_loop(session_id, &username, &mut lines, &msg_tx, &cmd_tx, &shutdown).await;

            // Cleanup runs on every exit path; the relay ignores repeats
            if cmd_tx
                .send(ServerCommand::Unregister {
                    username: username.clone(),
                    session_id,
                })
                .await
                .is_err()
            {
                debug!("Relay gone before {} could unregister", session_id);
            }
            info!("Session {} ('{}') disconnected", session_id, username);
            result
        }
        Ok(None) => {
            debug!("Connection {} closed before login", peer_addr);
            Ok(())
        }
        Err(e) => Err(e),
    };

    // The writer exits once every sender is gone, including the registry's
    drop(msg_tx);
    drain_writer(session_id, write_task).await;
    trace_state(session_id, ConnectionState::Closed);

    result
}

/// Prompt until a usable name is registered
///
/// Returns `None` when the peer leaves (or the server shuts down) before
/// choosing a name.
async fn authenticate<R, B>(
    session_id: SessionId,
    peer_addr: SocketAddr,
    lines: &mut R,
    msg_tx: &mpsc::Sender<ServerMessage>,
    cmd_tx: &mpsc::Sender<ServerCommand>,
    shutdown: &CancellationToken,
) -> Result<Option<Username>, AppError>
where
    R: Stream<Item = Result<B, AnyDelimiterCodecError>> + Unpin,
    B: AsRef<[u8]>,
{
    queue(msg_tx, ServerMessage::Prompt);

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                queue(msg_tx, ServerMessage::Closed);
                return Ok(None);
            }
            _ = msg_tx.closed() => {
                debug!("Writer for {} stopped during login", session_id);
                return Ok(None);
            }
            next = lines.next() => next,
        };

        let line = match next {
            Some(line) => decode_line(line?.as_ref()),
            None => return Ok(None),
        };

        let Some(username) = Username::parse(&line) else {
            queue(msg_tx, ServerMessage::Retry);
            continue;
        };

        let session = Session::new(session_id, username.clone(), peer_addr, msg_tx.clone());
        let (reply, accepted) = oneshot::channel();
        cmd_tx
            .send(ServerCommand::Register { session, reply })
            .await
            .map_err(|_| AppError::ChannelSend)?;

        if accepted.await.map_err(|_| AppError::ServerClosed)? {
            return Ok(Some(username));
        }

        debug!("Login as '{}' rejected for {}", username, peer_addr);
        queue(msg_tx, ServerMessage::Retry);
    }
}

/// Forward lines to the relay until quit, end of stream, fault or shutdown
async fn session_loop<R, B>(
    session_id: SessionId,
    username: &Username,
    lines: &mut R,
    msg_tx: &mpsc::Sender<ServerMessage>,
    cmd_tx: &mpsc::Sender<ServerCommand>,
    shutdown: &CancellationToken,
) -> Result<(), AppError>
where
    R: Stream<Item = Result<B, AnyDelimiterCodecError>> + Unpin,
    B: AsRef<[u8]>,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Session {} closing for shutdown", session_id);
                queue(msg_tx, ServerMessage::Closed);
                return Ok(());
            }
            // Writer hit a socket error; the peer can no longer be reached
            _ = msg_tx.closed() => {
                debug!("Writer for {} stopped, closing session", session_id);
                return Ok(());
            }
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => decode_line(line.as_ref()),
            Some(Err(e)) => {
                warn!("Read error for {}: {}", session_id, e);
                return Err(e.into());
            }
            None => {
                debug!("Session {} reached end of stream", session_id);
                return Ok(());
            }
        };

        let command = Command::parse(&line);
        if command == Command::Quit {
            queue(msg_tx, ServerMessage::Closed);
            return Ok(());
        }

        cmd_tx
            .send(ServerCommand::Line {
                username: username.clone(),
                session_id,
                command,
            })
            .await
            .map_err(|_| AppError::ChannelSend)?;
    }
}

/// Spawn the task that owns the socket's write half
fn spawn_writer(
    session_id: SessionId,
    write_half: OwnedWriteHalf,
    mut msg_rx: mpsc::Receiver<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sink = FramedWrite::new(write_half, LinesCodec::new());

        while let Some(msg) = msg_rx.recv().await {
            let closing = msg == ServerMessage::Closed;
            if let Err(e) = sink.send(msg.to_string()).await {
                debug!("Write failed for {}: {}", session_id, e);
                break;
            }
            if closing {
                break;
            }
        }

        // Flushes and shuts down the write half
        let _ = SinkExt::<String>::close(&mut sink).await;
        debug!("Write task ended for {}", session_id);
    })
}

async fn drain_writer(session_id: SessionId, mut write_task: JoinHandle<()>) {
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut write_task)
        .await
        .is_err()
    {
        warn!("Writer for {} did not drain in time, aborting", session_id);
        write_task.abort();
    }
}

/// Decode one inbound line, replacing invalid UTF-8 and dropping a trailing `\r`
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Queue a line for this connection's own peer without waiting
fn queue(msg_tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) {
    if let Err(e) = msg_tx.try_send(msg) {
        debug!("Could not queue line for peer: {}", e);
    }
}

fn trace_state(session_id: SessionId, state: ConnectionState) {
    debug!("Connection {} -> {:?}", session_id, state);
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    type Chunk = Result<Vec<u8>, AnyDelimiterCodecError>;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    #[test]
    fn test_decode_line_lossy() {
        assert_eq!(decode_line(b"caf\xff"), "caf\u{FFFD}");
        assert_eq!(decode_line(b"hello\r"), "hello");
        assert_eq!(decode_line(b""), "");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_forwarded_not_fatal() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (msg_tx, _msg_rx) = mpsc::channel(8);
        let username = Username::parse("alice").unwrap();
        let mut lines = stream::iter(vec![Chunk::Ok(b"caf\xff".to_vec()), Chunk::Ok(b"/list".to_vec())]);

        let result = session_loop(
            SessionId::new(),
            &username,
            &mut lines,
            &msg_tx,
            &cmd_tx,
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_ok());

        match cmd_rx.try_recv().unwrap() {
            ServerCommand::Line { command, .. } => {
                assert_eq!(command, Command::Chat("caf\u{FFFD}".to_string()))
            }
            other => panic!("Expected line, got {:?}", other),
        }
        match cmd_rx.try_recv().unwrap() {
            ServerCommand::Line { command, .. } => assert_eq!(command, Command::List),
            other => panic!("Expected line, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_ends_when_writer_stops() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (msg_tx, msg_rx) = mpsc::channel(8);
        drop(msg_rx);
        let username = Username::parse("alice").unwrap();
        let mut lines = stream::pending::<Chunk>();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            session_loop(
                SessionId::new(),
                &username,
                &mut lines,
                &msg_tx,
                &cmd_tx,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("session loop kept waiting on a dead writer");
        assert!(result.is_ok());
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_login_ends_when_writer_stops() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (msg_tx, msg_rx) = mpsc::channel(8);
        drop(msg_rx);
        let mut lines = stream::pending::<Chunk>();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            authenticate(
                SessionId::new(),
                peer(),
                &mut lines,
                &msg_tx,
                &cmd_tx,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("login kept waiting on a dead writer");
        assert!(matches!(result, Ok(None)));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_over_long_line_is_an_error() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (msg_tx, _msg_rx) = mpsc::channel(8);
        let username = Username::parse("alice").unwrap();
        let mut lines = stream::iter(vec![Chunk::Err(
            AnyDelimiterCodecError::MaxChunkLengthExceeded,
        )]);

        let result = session_loop(
            SessionId::new(),
            &username,
            &mut lines,
            &msg_tx,
            &cmd_tx,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Codec(_))));
    }
}
