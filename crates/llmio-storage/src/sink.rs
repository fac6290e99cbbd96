use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use crate::rows::ChatLogDraft;
use crate::storage::Storage;

const SINK_DEPTH: usize = 1024;

/// One chat log waiting to be persisted, with its optional captured IO.
#[derive(Debug)]
pub struct LogEntry {
    pub draft: ChatLogDraft,
    pub io: Option<(Vec<u8>, Vec<u8>)>,
}

/// Fire-and-forget chat-log writer. `submit` never blocks the request path;
/// when the channel is full the entry is dropped and counted.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogEntry>,
    dropped: Arc<AtomicU64>,
}

impl LogSink {
    pub fn spawn(storage: Arc<dyn Storage>) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogEntry>(SINK_DEPTH);
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                match storage.insert_chat_log(&entry.draft).await {
                    Ok(chat_log_id) => {
                        if let Some((request, response)) = entry.io
                            && let Err(err) = storage
                                .insert_chat_io(chat_log_id, &request, &response)
                                .await
                        {
                            warn!(event = "chat_io_write_failed", error = %err);
                        }
                    }
                    Err(err) => {
                        warn!(event = "chat_log_write_failed", error = %err);
                    }
                }
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn submit(&self, entry: LogEntry) {
        if self.tx.try_send(entry).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(event = "chat_log_dropped", total_dropped = dropped);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
