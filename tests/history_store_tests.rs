// History store tests: bounded series, persistence cadence, degraded reads, writer

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::sample;
use telemetry_sync::history_store::{
    HistorySeries, HistoryStore, HistoryWriterConfig, Metric, PersistRequest, decode_series,
    encode_series, spawn_history_writer,
};
use telemetry_sync::kv_store::{KvStore, MemoryKvStore};
use tokio::sync::mpsc;
use tokio::time::Duration;

#[test]
fn test_series_never_exceeds_capacity() {
    let mut series = HistorySeries::new(3);
    for v in 1..=5 {
        series.push(v as f64);
    }
    assert_eq!(series.len(), 3);
    assert_eq!(series.to_vec(), vec![3.0, 4.0, 5.0]);
    assert_eq!(series.latest(), Some(5.0));
}

#[test]
fn test_from_values_keeps_newest() {
    let series = HistorySeries::from_values((0..40).map(f64::from), 30);
    assert_eq!(series.len(), 30);
    assert_eq!(series.iter().next(), Some(10.0));
}

#[test]
fn test_decode_rejects_unknown_version() {
    let series = HistorySeries::from_values([1.0, 2.0], 30);
    let mut bytes = encode_series(&series).unwrap();
    bytes[0] = 99;
    assert!(decode_series(&bytes, 30).is_err());
    assert!(decode_series(&[], 30).is_err());
}

#[test]
fn test_decode_truncates_to_current_capacity() {
    let series = HistorySeries::from_values((0..30).map(f64::from), 30);
    let bytes = encode_series(&series).unwrap();
    let smaller = decode_series(&bytes, 10).unwrap();
    assert_eq!(smaller.len(), 10);
    assert_eq!(smaller.latest(), Some(29.0));
}

#[tokio::test]
async fn test_append_then_load_after_persist() {
    let store = Arc::new(MemoryKvStore::default());
    let mut history = HistoryStore::new(store.clone(), 30, 3, None);
    for v in [1.0, 2.0, 3.0] {
        history.append("a", Metric::Cpu, v);
    }
    let series = history.series("a", Metric::Cpu).unwrap().clone();
    store
        .set("a_cpuHistory", encode_series(&series).unwrap())
        .await
        .unwrap();

    let fresh = HistoryStore::new(store, 30, 3, None);
    assert_eq!(fresh.load("a", Metric::Cpu).await.to_vec(), vec![1.0, 2.0, 3.0]);
    assert!(fresh.load("b", Metric::Cpu).await.is_empty());
}

#[tokio::test]
async fn test_record_sample_persists_every_third_call() {
    let store = Arc::new(MemoryKvStore::default());
    let (tx, mut rx) = mpsc::channel::<PersistRequest>(64);
    let mut history = HistoryStore::new(store, 30, 3, Some(tx));

    assert!(!history.record_sample("a", &sample(1.0, 1.0, 1.0, 1.0)));
    assert!(!history.record_sample("a", &sample(2.0, 1.0, 1.0, 1.0)));
    assert!(rx.try_recv().is_err());
    assert!(history.record_sample("a", &sample(3.0, 1.0, 1.0, 1.0)));

    let mut keys = Vec::new();
    while let Ok(req) = rx.try_recv() {
        keys.push(req.key);
    }
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "a_cpuHistory",
            "a_lastSample",
            "a_netDownHistory",
            "a_netUpHistory",
            "a_ramHistory",
        ]
    );
    assert_eq!(history.series("a", Metric::Cpu).unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn test_targets_do_not_share_series() {
    let store = Arc::new(MemoryKvStore::default());
    let mut history = HistoryStore::new(store, 30, 3, None);
    history.record_sample("a", &sample(10.0, 0.0, 0.0, 0.0));
    history.record_sample("b", &sample(20.0, 0.0, 0.0, 0.0));
    assert_eq!(history.series("a", Metric::Cpu).unwrap().to_vec(), vec![10.0]);
    assert_eq!(history.series("b", Metric::Cpu).unwrap().to_vec(), vec![20.0]);
    assert_eq!(history.last_sample("b").unwrap().cpu_percent, 20.0);
}

#[tokio::test]
async fn test_unreadable_store_degrades_to_empty() {
    let store = Arc::new(MemoryKvStore::default());
    store.insert_raw("a_ramHistory", vec![1, 2, 3, 4, 5]);
    let history = HistoryStore::new(store.clone(), 30, 3, None);
    assert!(history.load("a", Metric::Ram).await.is_empty());

    store.set_fail_reads(true);
    assert!(history.load("a", Metric::Cpu).await.is_empty());
    assert!(history.load_last_sample("a").await.is_none());
}

#[tokio::test]
async fn test_full_writer_queue_drops_instead_of_blocking() {
    let store = Arc::new(MemoryKvStore::default());
    let (tx, mut rx) = mpsc::channel::<PersistRequest>(2);
    let mut history = HistoryStore::new(store, 30, 1, Some(tx));
    history.record_sample("a", &sample(1.0, 1.0, 1.0, 1.0));
    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 2);
}

#[tokio::test]
async fn test_writer_keeps_last_blob_per_key_and_flushes_on_close() {
    let store = Arc::new(MemoryKvStore::default());
    let persisted = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::channel(16);
    let writer = spawn_history_writer(
        rx,
        store.clone(),
        HistoryWriterConfig {
            flush_rate: 10,
            flush_interval: Duration::from_secs(3_600),
        },
        persisted.clone(),
    );
    for v in [1.0, 2.0] {
        let series = HistorySeries::from_values([v], 30);
        tx.send(PersistRequest {
            key: "a_cpuHistory".into(),
            data: encode_series(&series).unwrap(),
        })
        .await
        .unwrap();
    }
    drop(tx);
    writer.await.unwrap();

    assert_eq!(store.write_count(), 1);
    assert_eq!(persisted.load(Ordering::Relaxed), 1);
    let history = HistoryStore::new(store, 30, 3, None);
    assert_eq!(history.load("a", Metric::Cpu).await.to_vec(), vec![2.0]);
}

#[tokio::test]
async fn test_writer_survives_write_failures() {
    let store = Arc::new(MemoryKvStore::default());
    store.set_fail_writes(true);
    let persisted = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::channel(16);
    let writer = spawn_history_writer(
        rx,
        store.clone(),
        HistoryWriterConfig {
            flush_rate: 1,
            flush_interval: Duration::from_secs(3_600),
        },
        persisted.clone(),
    );
    tx.send(PersistRequest {
        key: "a_cpuHistory".into(),
        data: vec![1],
    })
    .await
    .unwrap();
    drop(tx);
    writer.await.unwrap();
    assert_eq!(store.write_count(), 0);
    assert_eq!(persisted.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_restore_loads_every_metric_and_last_sample() {
    let store = Arc::new(MemoryKvStore::default());
    let (tx, mut rx) = mpsc::channel::<PersistRequest>(64);
    let mut history = HistoryStore::new(store.clone(), 30, 1, Some(tx));
    history.record_sample("a", &sample(11.0, 22.0, 33.0, 44.0));
    while let Ok(req) = rx.try_recv() {
        store.set(&req.key, req.data).await.unwrap();
    }

    let mut restored = HistoryStore::new(store, 30, 3, None);
    assert_eq!(restored.restore(["a", "b"]).await, 4);
    assert_eq!(restored.series("a", Metric::NetUp).unwrap().to_vec(), vec![44.0]);
    assert!(restored.series("b", Metric::Cpu).unwrap().is_empty());
    assert_eq!(restored.last_sample("a").unwrap().ram_percent, 22.0);
    assert!(restored.last_sample("b").is_none());
}
