//! Shared harness for relay integration tests.
//!
//! Spawns a real server on an ephemeral port with a temporary transcript,
//! and drives it with plain line-based TCP clients.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chat_relay::{Config, Server, TranscriptHealth};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// A running relay
pub struct TestServer {
    pub addr: SocketAddr,
    pub transcript_path: PathBuf,
    pub health: Arc<TranscriptHealth>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with test defaults, then apply `tweak` before binding
    pub async fn spawn_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            transcript_path: dir.path().join("chat_history.txt"),
            shutdown_grace_ms: 1000,
            ..Config::default()
        };
        tweak(&mut config);
        let transcript_path = config.transcript_path.clone();

        let server = Server::bind(config).await.expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let shutdown = server.shutdown_token();
        let health = server.transcript_health();
        let task = tokio::spawn(async move {
            server.run().await.expect("server run");
        });

        Self {
            addr,
            transcript_path,
            health,
            shutdown,
            task,
            _dir: dir,
        }
    }

    /// Signal shutdown without waiting for it
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Shut the server down and wait for it to finish
    ///
    /// Call at most once; the transcript stays on disk until the server is dropped.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        timeout(Duration::from_secs(10), &mut self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked");
    }

    /// Shut the server down and return the transcript lines
    pub async fn stop(mut self) -> Vec<String> {
        self.shutdown().await;
        std::fs::read_to_string(&self.transcript_path)
            .expect("read transcript")
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Connect a raw client that has only seen the login prompt
    pub async fn connect(&self) -> TestClient {
        let mut client = TestClient::connect(self.addr).await.expect("connect");
        assert_eq!(client.recv().await, "Enter username:");
        client
    }

    /// Connect and log in, consuming the welcome and own join notice
    pub async fn login(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.send(name).await;
        let welcome = client.recv().await;
        assert!(welcome.starts_with(&format!("Welcome {}!", name)), "got {:?}", welcome);
        client
            .recv_until_suffix(&format!("{} has joined the chat.", name))
            .await;
        client
    }
}

/// A line-based test client
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("send line");
    }

    /// Write bytes exactly as given, including any line ending
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("send bytes");
    }

    /// Next line, or None at end of stream
    pub async fn try_recv(&mut self, dur: Duration) -> Option<Option<String>> {
        let mut line = String::new();
        match timeout(dur, self.reader.read_line(&mut line)).await {
            Err(_) => None,
            Ok(Ok(0)) => Some(None),
            Ok(Ok(_)) => Some(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Ok(Err(_)) => Some(None),
        }
    }

    pub async fn recv(&mut self) -> String {
        match self.try_recv(RECV_TIMEOUT).await {
            Some(Some(line)) => line,
            Some(None) => panic!("connection closed while waiting for a line"),
            None => panic!("timed out waiting for a line"),
        }
    }

    /// Skip lines until one ends with `suffix`
    pub async fn recv_until_suffix(&mut self, suffix: &str) -> String {
        loop {
            let line = self.recv().await;
            if line.ends_with(suffix) {
                return line;
            }
        }
    }

    /// Assert nothing arrives for a short while
    pub async fn expect_silence(&mut self) {
        if let Some(line) = self.try_recv(QUIET_PERIOD).await {
            panic!("expected silence, got {:?}", line);
        }
    }

    /// Read until the server closes the connection
    pub async fn expect_closed(&mut self) -> Vec<String> {
        let mut seen = Vec::new();
        loop {
            match self.try_recv(RECV_TIMEOUT).await {
                Some(Some(line)) => seen.push(line),
                Some(None) => return seen,
                None => panic!("connection not closed; saw {:?}", seen),
            }
        }
    }

    /// Half-close the write side, as a client exiting would
    pub async fn hang_up(mut self) {
        let _ = self.writer.shutdown().await;
    }
}
