// Dedicated history writer task: receives encoded series from the scheduler and
// flushes them to the key-value store. Keeps only the newest blob per key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::time::{Duration, interval};

use crate::kv_store::KvStore;

/// One encoded blob bound for `key`.
#[derive(Debug)]
pub struct PersistRequest {
    pub key: String,
    pub data: Vec<u8>,
}

pub struct HistoryWriterConfig {
    /// Flush once this many distinct keys are pending.
    pub flush_rate: usize,
    pub flush_interval: Duration,
}

/// Channel capacity for the writer (a target emits five blobs per persist).
pub fn writer_channel_capacity(target_count: usize) -> usize {
    (target_count * 5 * 2).max(32)
}

/// Flushes when `flush_rate` keys are pending, every `flush_interval`, and once more
/// when every sender is gone (then exits).
pub fn spawn_history_writer<S: KvStore>(
    mut write_rx: mpsc::Receiver<PersistRequest>,
    store: Arc<S>,
    config: HistoryWriterConfig,
    persisted_total: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut flush_tick = interval(config.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = write_rx.recv() => {
                    match result {
                        Some(req) => {
                            pending.insert(req.key, req.data);
                            if pending.len() >= config.flush_rate {
                                flush_pending(store.as_ref(), &mut pending, &persisted_total).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    flush_pending(store.as_ref(), &mut pending, &persisted_total).await;
                }
            }
        }
        flush_pending(store.as_ref(), &mut pending, &persisted_total).await;
        tracing::debug!("History writer shutting down");
    })
}

async fn flush_pending<S: KvStore>(
    store: &S,
    pending: &mut BTreeMap<String, Vec<u8>>,
    persisted_total: &AtomicU64,
) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    let n = batch.len();
    let mut failed = 0usize;
    for (key, data) in batch {
        if let Err(e) = store.set(&key, data).await {
            failed += 1;
            tracing::warn!(error = %e, key = %key, operation = "persist_series", "history write failed");
        }
    }
    persisted_total.fetch_add((n - failed) as u64, Ordering::Relaxed);
    tracing::debug!(
        operation = "persist_series",
        keys_count = n,
        failed,
        "History flushed"
    );
}
