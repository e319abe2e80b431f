//! Transcript writer
//!
//! A dedicated task owns the append-only transcript file and writes lines
//! in the order they were queued. Queueing never waits: when the writer is
//! behind or the disk is failing, lines are dropped and counted instead of
//! holding up delivery.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::ChatLine;

/// Degraded-mode counters, shared with whoever wants to observe them
#[derive(Debug, Default)]
pub struct TranscriptHealth {
    write_failures: AtomicU64,
    dropped: AtomicU64,
}

impl TranscriptHealth {
    /// Lines that reached the writer but failed to hit the file
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Lines discarded before reaching the writer
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True while every queued line has been persisted
    pub fn is_healthy(&self) -> bool {
        self.write_failures() == 0 && self.dropped() == 0
    }
}

/// Handle to the transcript writer task
///
/// Owned by the relay, which is the single point that decides transcript
/// order.
#[derive(Debug)]
pub struct Transcript {
    sender: mpsc::Sender<ChatLine>,
    health: Arc<TranscriptHealth>,
    task: JoinHandle<()>,
}

impl Transcript {
    /// Open (or create) the transcript file in append mode and start the writer
    pub async fn open(path: &Path, capacity: usize) -> Result<Self, AppError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        info!("Transcript opened at {}", path.display());

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let health = Arc::new(TranscriptHealth::default());
        let task = tokio::spawn(write_loop(file, receiver, Arc::clone(&health)));

        Ok(Self {
            sender,
            health,
            task,
        })
    }

    /// Queue one line for persistence
    ///
    /// Never waits. Failures are logged and counted, never returned.
    pub fn append(&self, line: &ChatLine) {
        match self.sender.try_send(line.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(line)) => {
                self.health.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Transcript writer behind, dropped line: {}", line);
            }
            Err(TrySendError::Closed(line)) => {
                self.health.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Transcript writer stopped, dropped line: {}", line);
            }
        }
    }

    pub fn health(&self) -> Arc<TranscriptHealth> {
        Arc::clone(&self.health)
    }

    /// Write out everything queued so far, then close the file
    pub async fn close(self) {
        drop(self.sender);
        if let Err(e) = self.task.await {
            error!("Transcript writer task failed: {}", e);
        }
    }
}

async fn write_loop(
    file: File,
    mut receiver: mpsc::Receiver<ChatLine>,
    health: Arc<TranscriptHealth>,
) {
    let mut writer = BufWriter::new(file);

    while let Some(line) = receiver.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            health.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Transcript write failed: {}", e);
        }
    }

    if let Err(e) = writer.flush().await {
        warn!("Transcript flush failed: {}", e);
    }
    if let Err(e) = writer.get_mut().sync_all().await {
        warn!("Transcript sync failed: {}", e);
    }
    debug!("Transcript writer closed");
}

async fn write_line(writer: &mut BufWriter<File>, line: &ChatLine) -> std::io::Result<()> {
    writer.write_all(line.as_str().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
