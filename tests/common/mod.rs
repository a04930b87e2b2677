// Shared test helpers
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use telemetry_sync::fetch::{FetchError, RequestDeduper, TelemetryFetcher};
use telemetry_sync::history_store::HistoryStore;
use telemetry_sync::kv_store::MemoryKvStore;
use telemetry_sync::models::{Disk, Sample, Target};
use telemetry_sync::registry::{TargetRegistry, element_id};
use telemetry_sync::scheduler::{self, EngineCommand, EngineConfig, EngineDeps, TargetReport};
use telemetry_sync::status::{BackoffPolicy, Connectivity};
use telemetry_sync::view::{
    ChartKind, DISK_LIST_SLOT, DiskField, DiskRow, LOADING_SLOT, OVERLAY_SLOT, Readout, STATUS_SLOT,
    ViewPatch, ViewSink,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};

pub fn target(id: &str, endpoint: &str) -> Target {
    Target {
        id: id.into(),
        display_name: id.into(),
        endpoint: endpoint.into(),
        description: String::new(),
    }
}

pub fn disk(name: &str, used: &str, total: &str, percent: u8) -> Disk {
    Disk {
        name: name.into(),
        used_label: used.into(),
        total_label: total.into(),
        percent,
        errored: false,
    }
}

pub fn sample(cpu: f64, ram: f64, down: f64, up: f64) -> Sample {
    Sample {
        cpu_percent: cpu,
        ram_percent: ram,
        download_mbps: down,
        upload_mbps: up,
        storage_total_used: 3.0,
        disks: vec![disk("sda", "0.5", "1", 50)],
    }
}

struct Scripted {
    delay: Duration,
    result: Result<Sample, FetchError>,
}

#[derive(Default)]
struct ScriptState {
    queued: HashMap<String, VecDeque<Scripted>>,
    fallback: HashMap<String, Scripted>,
    calls: Vec<(String, Instant)>,
}

/// Fetcher that answers from per-endpoint scripts. Once an endpoint's queue is
/// empty its fallback answers (default: network error, no delay).
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedFetcher {
    pub fn push(&self, endpoint: &str, delay: Duration, result: Result<Sample, FetchError>) {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Scripted { delay, result });
    }

    pub fn always(&self, endpoint: &str, delay: Duration, result: Result<Sample, FetchError>) {
        self.state
            .lock()
            .unwrap()
            .fallback
            .insert(endpoint.to_string(), Scripted { delay, result });
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }

    pub fn call_instants(&self, endpoint: &str) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, at)| *at)
            .collect()
    }
}

impl TelemetryFetcher for ScriptedFetcher {
    async fn fetch(&self, endpoint: &str) -> Result<Sample, FetchError> {
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((endpoint.to_string(), Instant::now()));
            match state.queued.get_mut(endpoint).and_then(VecDeque::pop_front) {
                Some(s) => (s.delay, s.result),
                None => match state.fallback.get(endpoint) {
                    Some(s) => (s.delay, s.result.clone()),
                    None => (Duration::ZERO, Err(FetchError::Network("unscripted".into()))),
                },
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// ViewSink that records every write as the patch a browser would receive.
#[derive(Clone, Default)]
pub struct RecordingView {
    log: Arc<Mutex<Vec<ViewPatch>>>,
}

impl RecordingView {
    pub fn patches(&self) -> Vec<ViewPatch> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn texts(&self, target: &str, readout: Readout) -> Vec<String> {
        self.patches()
            .into_iter()
            .filter_map(|p| match p {
                ViewPatch::Text {
                    target_id,
                    readout: r,
                    text,
                    ..
                } if target_id == target && r == readout => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn text_writes(&self, target: &str) -> usize {
        self.patches()
            .iter()
            .filter(|p| matches!(p, ViewPatch::Text { target_id, .. } if target_id == target))
            .count()
    }

    pub fn statuses(&self, target: &str) -> Vec<(Connectivity, String)> {
        self.patches()
            .into_iter()
            .filter_map(|p| match p {
                ViewPatch::Status {
                    target_id,
                    state,
                    message,
                    ..
                } if target_id == target => Some((state, message)),
                _ => None,
            })
            .collect()
    }

    pub fn overlays(&self, target: &str) -> Vec<bool> {
        self.patches()
            .into_iter()
            .filter_map(|p| match p {
                ViewPatch::Overlay {
                    target_id, visible, ..
                } if target_id == target => Some(visible),
                _ => None,
            })
            .collect()
    }

    pub fn loading(&self, target: &str) -> Vec<bool> {
        self.patches()
            .into_iter()
            .filter_map(|p| match p {
                ViewPatch::Loading {
                    target_id, visible, ..
                } if target_id == target => Some(visible),
                _ => None,
            })
            .collect()
    }

    pub fn charts(&self, target: &str, chart: ChartKind) -> Vec<Vec<Vec<f64>>> {
        self.patches()
            .into_iter()
            .filter_map(|p| match p {
                ViewPatch::Chart {
                    target_id,
                    chart: c,
                    series,
                    ..
                } if target_id == target && c == chart => Some(series),
                _ => None,
            })
            .collect()
    }

    pub fn disk_rebuilds(&self, target: &str) -> Vec<Vec<DiskRow>> {
        self.patches()
            .into_iter()
            .filter_map(|p| match p {
                ViewPatch::DiskList {
                    target_id, rows, ..
                } if target_id == target => Some(rows),
                _ => None,
            })
            .collect()
    }

    pub fn disk_updates(&self, target: &str) -> Vec<(String, DiskField, String)> {
        self.patches()
            .into_iter()
            .filter_map(|p| match p {
                ViewPatch::DiskRow {
                    target_id,
                    row_id,
                    field,
                    value,
                } if target_id == target => Some((row_id, field, value)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, patch: ViewPatch) {
        self.log.lock().unwrap().push(patch);
    }
}

impl ViewSink for RecordingView {
    fn set_status(&mut self, target_id: &str, state: Connectivity, message: &str) {
        self.push(ViewPatch::Status {
            target_id: target_id.into(),
            element_id: element_id(target_id, STATUS_SLOT),
            state,
            message: message.into(),
        });
    }

    fn set_text(&mut self, target_id: &str, readout: Readout, text: &str) {
        self.push(ViewPatch::Text {
            target_id: target_id.into(),
            element_id: element_id(target_id, readout.slot()),
            readout,
            text: text.into(),
        });
    }

    fn set_overlay(&mut self, target_id: &str, visible: bool) {
        self.push(ViewPatch::Overlay {
            target_id: target_id.into(),
            element_id: element_id(target_id, OVERLAY_SLOT),
            visible,
        });
    }

    fn set_loading(&mut self, target_id: &str, visible: bool) {
        self.push(ViewPatch::Loading {
            target_id: target_id.into(),
            element_id: element_id(target_id, LOADING_SLOT),
            visible,
        });
    }

    fn paint_chart(&mut self, target_id: &str, chart: ChartKind, series: Vec<Vec<f64>>) {
        self.push(ViewPatch::Chart {
            target_id: target_id.into(),
            element_id: element_id(target_id, chart.slot()),
            chart,
            series,
        });
    }

    fn rebuild_disk_list(&mut self, target_id: &str, rows: &[DiskRow]) {
        self.push(ViewPatch::DiskList {
            target_id: target_id.into(),
            element_id: element_id(target_id, DISK_LIST_SLOT),
            rows: rows.to_vec(),
        });
    }

    fn update_disk_row(&mut self, target_id: &str, row_id: &str, field: DiskField, value: &str) {
        self.push(ViewPatch::DiskRow {
            target_id: target_id.into(),
            row_id: row_id.into(),
            field,
            value: value.into(),
        });
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        fast_interval: Duration::from_millis(2_000),
        slow_interval: Duration::from_millis(15_000),
        fetch_timeout: Duration::from_millis(10_000),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(5_000),
            max: Duration::from_millis(60_000),
        },
        failure_overlay_threshold: 3,
        frame_interval: Duration::from_millis(16),
        stats_log_interval: Duration::from_secs(3_600),
    }
}

/// A running engine plus every handle a test pokes at.
pub struct EngineHarness {
    pub fetcher: ScriptedFetcher,
    pub deduper: RequestDeduper<ScriptedFetcher>,
    pub view: RecordingView,
    pub visibility_tx: watch::Sender<bool>,
    pub commands: mpsc::Sender<EngineCommand>,
    pub shutdown_tx: Option<oneshot::Sender<()>>,
    pub handle: tokio::task::JoinHandle<()>,
}

impl EngineHarness {
    pub async fn reports(&self) -> Vec<TargetReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Inspect { reply })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn report(&self, target_id: &str) -> TargetReport {
        self.reports()
            .await
            .into_iter()
            .find(|r| r.target_id == target_id)
            .unwrap()
    }

    pub async fn retry(&self, target_id: &str) {
        self.commands
            .send(EngineCommand::Retry {
                target_id: target_id.into(),
            })
            .await
            .unwrap();
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap();
    }
}

/// Spawn an engine over `targets` with a fresh in-memory history.
pub fn start_engine(targets: Vec<Target>, fetcher: ScriptedFetcher, visible: bool) -> EngineHarness {
    let history = HistoryStore::new(Arc::new(MemoryKvStore::default()), 30, 3, None);
    start_engine_with(targets, fetcher, history, visible, engine_config())
}

pub fn start_engine_with(
    targets: Vec<Target>,
    fetcher: ScriptedFetcher,
    history: HistoryStore<MemoryKvStore>,
    visible: bool,
    config: EngineConfig,
) -> EngineHarness {
    let registry = Arc::new(TargetRegistry::new(targets).unwrap());
    let deduper = RequestDeduper::new(Arc::new(fetcher.clone()));
    let view = RecordingView::default();
    let (visibility_tx, visibility_rx) = watch::channel(visible);
    let (commands, command_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = scheduler::spawn(
        EngineDeps {
            registry,
            deduper: deduper.clone(),
            history,
            view: view.clone(),
            visibility_rx,
            command_rx,
            shutdown_rx,
            series_persisted_total: Arc::new(AtomicU64::new(0)),
        },
        config,
    );
    EngineHarness {
        fetcher,
        deduper,
        view,
        visibility_tx,
        commands,
        shutdown_tx: Some(shutdown_tx),
        handle,
    }
}
