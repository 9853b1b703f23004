//! Bounded async writer draining events to a line-delimited sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{AuditError, AuditEvent, AuditSink};

/// Minimum spacing between distress summaries.
const DISTRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Single-worker async audit writer with a bounded buffer.
///
/// Overflow discipline is chosen at construction: availability mode drops
/// and counts, integrity mode suspends the caller until capacity frees up or
/// the caller's scope is cancelled. Either way the worker preserves enqueue
/// order and never writes an event twice.
pub struct AsyncAuditWriter {
    tx: Mutex<Option<mpsc::Sender<AuditEvent>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    last_distress: Mutex<Option<Instant>>,
    block_on_full: bool,
}

impl AsyncAuditWriter {
    /// Starts the worker draining to `sink`.
    pub fn new<W>(sink: W, capacity: usize, block_on_full: bool) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(rx, Box::new(sink)));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
            last_distress: Mutex::new(None),
            block_on_full,
        }
    }

    /// Submits one event under the configured discipline. In integrity mode
    /// this waits for capacity without any cancellation bound.
    pub async fn submit(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.block_on_full {
            self.submit_waiting(event, None).await
        } else {
            self.submit_nonblocking(event)
        }
    }

    /// Like [`submit`](Self::submit), but in integrity mode the wait races
    /// the caller's cancellation scope; a cancelled wait drops the event and
    /// counts it toward the distress summary.
    pub async fn submit_scoped(
        &self,
        event: AuditEvent,
        cancel: &CancellationToken,
    ) -> Result<(), AuditError> {
        if self.block_on_full {
            self.submit_waiting(event, Some(cancel)).await
        } else {
            self.submit_nonblocking(event)
        }
    }

    /// Cumulative number of dropped events. Monotone.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting events, drains the buffer, and joins the worker.
    /// Safe to call more than once.
    pub async fn close(&self) {
        let sender = self.tx.lock().expect("audit sender lock poisoned").take();
        drop(sender);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                error!("audit worker terminated abnormally");
            }
            info!("audit writer closed");
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<AuditEvent>> {
        self.tx.lock().expect("audit sender lock poisoned").clone()
    }

    fn submit_nonblocking(&self, event: AuditEvent) -> Result<(), AuditError> {
        let Some(tx) = self.sender() else {
            return Err(AuditError::Closed);
        };
        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                self.note_drop(&event.action);
                Err(AuditError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => Err(AuditError::Closed),
        }
    }

    async fn submit_waiting(
        &self,
        event: AuditEvent,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), AuditError> {
        let Some(tx) = self.sender() else {
            return Err(AuditError::Closed);
        };
        match cancel {
            None => match tx.reserve().await {
                Ok(permit) => {
                    permit.send(event);
                    Ok(())
                }
                Err(_) => Err(AuditError::Closed),
            },
            Some(token) => tokio::select! {
                permit = tx.reserve() => match permit {
                    Ok(permit) => {
                        permit.send(event);
                        Ok(())
                    }
                    Err(_) => Err(AuditError::Closed),
                },
                _ = token.cancelled() => {
                    self.note_drop(&event.action);
                    Err(AuditError::Cancelled)
                }
            },
        }
    }

    fn note_drop(&self, sample_action: &str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

        let mut last = self
            .last_distress
            .lock()
            .expect("audit distress lock poisoned");
        let now = Instant::now();
        let due = match *last {
            Some(at) => now.duration_since(at) >= DISTRESS_INTERVAL,
            None => true,
        };
        if due {
            *last = Some(now);
            warn!(
                dropped_count = total,
                sample_action = sample_action,
                blocking_mode = self.block_on_full,
                "audit events dropped under pressure"
            );
        }
    }
}

#[async_trait]
impl AuditSink for AsyncAuditWriter {
    async fn submit(&self, event: AuditEvent) -> Result<(), AuditError> {
        AsyncAuditWriter::submit(self, event).await
    }
}

async fn drain(
    mut rx: mpsc::Receiver<AuditEvent>,
    mut sink: Box<dyn AsyncWrite + Send + Unpin>,
) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_vec(&event) {
            Ok(mut line) => {
                line.push(b'\n');
                if let Err(err) = sink.write_all(&line).await {
                    error!(error = %err, "audit write failed");
                }
            }
            Err(err) => error!(error = %err, "audit event encoding failed"),
        }
    }
    if let Err(err) = sink.flush().await {
        error!(error = %err, "audit flush failed");
    }
}
