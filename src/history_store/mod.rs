// Bounded per-target, per-metric history with best-effort persistence.
//
// Series live in memory (owned by the scheduler). Every `persist_every` successful
// samples a target's series are encoded and queued for the history writer task, so
// the scheduler never awaits storage. Read or decode failures degrade to an empty
// series; write failures are logged by the writer.

mod blob;
mod writer;

pub use writer::{HistoryWriterConfig, PersistRequest, spawn_history_writer, writer_channel_capacity};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use wincode::{SchemaRead, SchemaWrite};

use crate::kv_store::KvStore;
use crate::models::Sample;
use crate::registry::storage_key;

pub const DEFAULT_CAPACITY: usize = 30;

/// Storage key suffix for the last successful sample of a target.
pub const LAST_SAMPLE_KEY: &str = "lastSample";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Cpu,
    Ram,
    NetDown,
    NetUp,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Cpu, Metric::Ram, Metric::NetDown, Metric::NetUp];

    /// Name used in the storage key.
    pub fn key_name(self) -> &'static str {
        match self {
            Metric::Cpu => "cpuHistory",
            Metric::Ram => "ramHistory",
            Metric::NetDown => "netDownHistory",
            Metric::NetUp => "netUpHistory",
        }
    }

    pub fn value_of(self, sample: &Sample) -> f64 {
        match self {
            Metric::Cpu => sample.cpu_percent,
            Metric::Ram => sample.ram_percent,
            Metric::NetDown => sample.download_mbps,
            Metric::NetUp => sample.upload_mbps,
        }
    }
}

/// FIFO sequence that never holds more than `capacity` values.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySeries {
    values: VecDeque<f64>,
    capacity: usize,
}

impl HistorySeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Keeps the newest `capacity` values of `values`.
    pub fn from_values(values: impl IntoIterator<Item = f64>, capacity: usize) -> Self {
        let mut series = Self::new(capacity);
        for v in values {
            series.push(v);
        }
        series
    }

    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        while self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

#[derive(SchemaRead, SchemaWrite)]
struct SeriesBlob {
    values: Vec<f64>,
}

pub fn encode_series(series: &HistorySeries) -> anyhow::Result<Vec<u8>> {
    let payload = wincode::serialize(&SeriesBlob {
        values: series.to_vec(),
    })
    .map_err(|e| anyhow::anyhow!("wincode series: {}", e))?;
    Ok(blob::with_version_prefix(payload))
}

pub fn decode_series(bytes: &[u8], capacity: usize) -> anyhow::Result<HistorySeries> {
    let payload = blob::versioned_payload(bytes)
        .ok_or_else(|| anyhow::anyhow!("unknown series blob version"))?;
    let decoded: SeriesBlob = wincode::deserialize(payload)
        .map_err(|e| anyhow::anyhow!("wincode deserialize series: {}", e))?;
    Ok(HistorySeries::from_values(decoded.values, capacity))
}

pub fn encode_sample(sample: &Sample) -> anyhow::Result<Vec<u8>> {
    let payload =
        wincode::serialize(sample).map_err(|e| anyhow::anyhow!("wincode sample: {}", e))?;
    Ok(blob::with_version_prefix(payload))
}

pub fn decode_sample(bytes: &[u8]) -> anyhow::Result<Sample> {
    let payload = blob::versioned_payload(bytes)
        .ok_or_else(|| anyhow::anyhow!("unknown sample blob version"))?;
    wincode::deserialize(payload).map_err(|e| anyhow::anyhow!("wincode deserialize sample: {}", e))
}

pub struct HistoryStore<S> {
    store: Arc<S>,
    capacity: usize,
    persist_every: u32,
    series: HashMap<(String, Metric), HistorySeries>,
    last_samples: HashMap<String, Sample>,
    ticks: HashMap<String, u32>,
    persist_tx: Option<mpsc::Sender<PersistRequest>>,
}

impl<S: KvStore> HistoryStore<S> {
    /// `persist_tx = None` keeps everything in memory.
    pub fn new(
        store: Arc<S>,
        capacity: usize,
        persist_every: u32,
        persist_tx: Option<mpsc::Sender<PersistRequest>>,
    ) -> Self {
        Self {
            store,
            capacity,
            persist_every: persist_every.max(1),
            series: HashMap::new(),
            last_samples: HashMap::new(),
            ticks: HashMap::new(),
            persist_tx,
        }
    }

    /// Read one persisted series. Missing, unreadable or undecodable data is an empty series.
    pub async fn load(&self, target_id: &str, metric: Metric) -> HistorySeries {
        let key = storage_key(target_id, metric.key_name());
        match self.store.get(&key).await {
            Ok(Some(bytes)) => decode_series(&bytes, self.capacity).unwrap_or_else(|e| {
                tracing::debug!(error = %e, key = %key, "discarding undecodable series");
                HistorySeries::new(self.capacity)
            }),
            Ok(None) => HistorySeries::new(self.capacity),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, operation = "load_series", "history read failed");
                HistorySeries::new(self.capacity)
            }
        }
    }

    pub async fn load_last_sample(&self, target_id: &str) -> Option<Sample> {
        let key = storage_key(target_id, LAST_SAMPLE_KEY);
        match self.store.get(&key).await {
            Ok(Some(bytes)) => match decode_sample(&bytes) {
                Ok(sample) => Some(sample),
                Err(e) => {
                    tracing::debug!(error = %e, key = %key, "discarding undecodable sample");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, operation = "load_last_sample", "history read failed");
                None
            }
        }
    }

    /// Load every metric (and the last sample) of each target into memory.
    /// Returns how many non-empty series were restored.
    pub async fn restore<'a>(&mut self, target_ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut restored = 0;
        for target_id in target_ids {
            for metric in Metric::ALL {
                let series = self.load(target_id, metric).await;
                if !series.is_empty() {
                    restored += 1;
                }
                self.series.insert((target_id.to_string(), metric), series);
            }
            if let Some(sample) = self.load_last_sample(target_id).await {
                self.last_samples.insert(target_id.to_string(), sample);
            }
        }
        restored
    }

    /// Push one value, evicting the oldest when full. Returns the updated series.
    pub fn append(&mut self, target_id: &str, metric: Metric, value: f64) -> &HistorySeries {
        let capacity = self.capacity;
        let series = self
            .series
            .entry((target_id.to_string(), metric))
            .or_insert_with(|| HistorySeries::new(capacity));
        series.push(value);
        series
    }

    pub fn series(&self, target_id: &str, metric: Metric) -> Option<&HistorySeries> {
        self.series.get(&(target_id.to_string(), metric))
    }

    pub fn last_sample(&self, target_id: &str) -> Option<&Sample> {
        self.last_samples.get(target_id)
    }

    /// Append every metric of a successful sample. Persists the target's series and
    /// last sample every `persist_every` calls; returns whether this call persisted.
    pub fn record_sample(&mut self, target_id: &str, sample: &Sample) -> bool {
        for metric in Metric::ALL {
            self.append(target_id, metric, metric.value_of(sample));
        }
        self.last_samples
            .insert(target_id.to_string(), sample.clone());

        let tick = self.ticks.entry(target_id.to_string()).or_insert(0);
        *tick = (*tick + 1) % self.persist_every;
        if *tick == 0 {
            self.flush_target(target_id);
            true
        } else {
            false
        }
    }

    /// Queue one series for the writer. Never blocks; a full queue drops the write.
    pub fn persist(&self, target_id: &str, metric: Metric, series: &HistorySeries) {
        match encode_series(series) {
            Ok(data) => self.enqueue(storage_key(target_id, metric.key_name()), data),
            Err(e) => tracing::warn!(error = %e, target_id, "series encode failed"),
        }
    }

    pub fn flush_target(&self, target_id: &str) {
        for metric in Metric::ALL {
            if let Some(series) = self.series(target_id, metric) {
                self.persist(target_id, metric, series);
            }
        }
        if let Some(sample) = self.last_samples.get(target_id) {
            match encode_sample(sample) {
                Ok(data) => self.enqueue(storage_key(target_id, LAST_SAMPLE_KEY), data),
                Err(e) => tracing::warn!(error = %e, target_id, "sample encode failed"),
            }
        }
    }

    pub fn flush_all(&self) {
        let mut targets: Vec<&str> = self.last_samples.keys().map(String::as_str).collect();
        targets.extend(self.series.keys().map(|(t, _)| t.as_str()));
        targets.sort_unstable();
        targets.dedup();
        for target_id in targets {
            self.flush_target(target_id);
        }
    }

    fn enqueue(&self, key: String, data: Vec<u8>) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        match tx.try_send(PersistRequest { key, data }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(req)) => {
                tracing::debug!(key = %req.key, "history writer queue full; dropping write");
            }
            Err(mpsc::error::TrySendError::Closed(req)) => {
                tracing::debug!(key = %req.key, "history writer closed; dropping write");
            }
        }
    }
}
