use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, warn};

use dispatch_core::types::{DialogId, TranscriptEntry};
use dispatch_persistence::PersistenceApi;

/// Default flush-size threshold (§4.3).
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Per-dialog FIFO of `TranscriptEntry`, flushed to `PersistenceApi` by size
/// threshold, periodic tick, or an explicit end-of-dialog signal (§4.3).
///
/// Flush is called with the batcher mutex held only long enough to take the
/// dialog's queued entries — the persistence calls themselves run with the
/// lock released, so one dialog's writes never stall another's `save`.
pub struct Batcher<P: PersistenceApi> {
    queues: Mutex<HashMap<DialogId, Vec<TranscriptEntry>>>,
    persistence: Arc<P>,
    batch_size: usize,
}

impl<P: PersistenceApi> Batcher<P> {
    pub fn new(persistence: Arc<P>, batch_size: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            persistence,
            batch_size,
        }
    }

    /// Append `entry` to `dialog_id`'s queue; flushes that dialog immediately
    /// if the queue has reached `batch_size`.
    #[instrument(skip(self, entry), fields(%dialog_id))]
    pub async fn save(&self, dialog_id: DialogId, entry: TranscriptEntry) {
        let should_flush = {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues.entry(dialog_id).or_default();
            queue.push(entry);
            queue.len() >= self.batch_size
        };

        if should_flush {
            self.flush_dialog(dialog_id).await;
        }
    }

    /// Number of entries currently queued for `dialog_id`.
    pub fn pending_len(&self, dialog_id: DialogId) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(&dialog_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn take_queue(&self, dialog_id: DialogId) -> Vec<TranscriptEntry> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(&dialog_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn dialog_ids(&self) -> Vec<DialogId> {
        self.queues.lock().unwrap().keys().copied().collect()
    }

    /// Drain and persist `dialog_id`'s queue. Individual entry failures are
    /// logged and do not abort the rest of the batch.
    #[instrument(skip(self), fields(%dialog_id))]
    pub async fn flush_dialog(&self, dialog_id: DialogId) {
        let entries = self.take_queue(dialog_id);
        if entries.is_empty() {
            return;
        }

        for entry in &entries {
            let json = match serde_json::to_string(entry) {
                Ok(j) => j,
                Err(e) => {
                    error!(error = %e, "failed to serialize transcript entry, dropping");
                    continue;
                }
            };
            if let Err(e) = self.persistence.save_dialog(dialog_id, &json) {
                error!(error = %e, "failed to persist transcript entry");
            }
        }

        info!(count = entries.len(), "flushed dialog transcript batch");
    }

    /// Flush every dialog with a non-empty queue.
    pub async fn flush_all(&self) {
        for dialog_id in self.dialog_ids() {
            self.flush_dialog(dialog_id).await;
        }
    }

    /// Periodic flusher: calls `flush_all` every `period` until `shutdown`
    /// broadcasts `true`, then flushes once more before returning.
    pub async fn run_ticker(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("batcher ticker started");
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_all().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("batcher ticker shutting down");
                        self.flush_all().await;
                        break;
                    }
                }
            }
        }
    }

    /// Consumes an "end-of-dialog" signal channel, flushing the named dialog
    /// immediately on each signal, until the channel closes.
    pub async fn run_end_of_dialog_listener(self: Arc<Self>, mut signals: mpsc::Receiver<DialogId>) {
        while let Some(dialog_id) = signals.recv().await {
            self.flush_dialog(dialog_id).await;
        }
        warn!("end-of-dialog signal channel closed");
    }

    /// Cancel background workers (the caller owns their join handles) and
    /// flush everything that remains.
    pub async fn shutdown(self: Arc<Self>) {
        info!("batcher shutting down, flushing remaining entries");
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.flush_all().await;
    }
}
