use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::writer::{AuditWriteError, AuditWriter};

const CHANNEL_BUFFER: usize = 1024;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle for submitting [`AuditEntry`] values to a background
/// writer task.
///
/// Submission never waits: request handlers call [`record`](Self::record) on
/// the hot path, and when the channel is full the entry is dropped and
/// counted instead.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEntry>>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Open `path` for appending and spawn the writer task.
    ///
    /// The task flushes about once a second while entries arrive, and a
    /// final time once every clone of the sink is dropped.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let writer = AuditWriter::open(path).await?;
        Ok(Self::spawn(writer))
    }

    /// Spawn the writer task over an arbitrary writer.
    pub fn spawn<W>(writer: AuditWriter<W>) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let handle = tokio::spawn(run_writer(writer, rx));
        let sink = Self {
            tx: Some(tx),
            dropped: Arc::default(),
        };
        (sink, handle)
    }

    /// A sink that discards everything, for when no audit log is configured.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an entry without waiting.
    pub fn record(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(entry) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let (reason, entry) = match err {
                mpsc::error::TrySendError::Full(entry) => ("full", entry),
                mpsc::error::TrySendError::Closed(entry) => ("closed", entry),
            };
            tracing::warn!(event_type = ?entry.event_type, reason, "audit entry dropped");
        }
    }

    /// Entries dropped because the writer could not keep up or had exited.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_writer<W>(mut writer: AuditWriter<W>, mut rx: mpsc::Receiver<AuditEntry>)
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut dirty = false;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(entry) => match writer.write(&entry).await {
                    Ok(()) => dirty = true,
                    Err(err) => tracing::error!(%err, "failed to write audit entry"),
                },
                None => break,
            },
            _ = ticker.tick(), if dirty => {
                match writer.flush().await {
                    Ok(()) => dirty = false,
                    Err(err) => tracing::error!(%err, "periodic audit flush failed"),
                }
            }
        }
    }

    if let Err(err) = writer.flush().await {
        tracing::error!(%err, "final audit flush failed");
    }
    tracing::debug!(written = writer.written(), "audit writer stopped");
}
