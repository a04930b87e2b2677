// Polling scheduler: one task owns every target's EngineState and is the only
// writer to the view.
//
// Polls run as spawned tasks and report back over a channel tagged with the
// target's poll sequence number; a completion whose sequence is not the target's
// current in-flight poll was superseded and is dropped. Superseding does not reset
// the target's response deadline: once it has gone `fetch_timeout` without any
// answer, the next tick records a Timeout failure instead of polling again. Chart
// repaints are queued and flushed once per frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, interval, interval_at, sleep_until};
use tracing::Instrument;

use crate::config::AppConfig;
use crate::disks::{DiskListState, reconcile_disks};
use crate::fetch::{FetchError, PendingFetch, RequestDeduper, TelemetryFetcher};
use crate::history_store::HistoryStore;
use crate::kv_store::KvStore;
use crate::models::Sample;
use crate::registry::TargetRegistry;
use crate::render::{ChartQueue, RenderCache, reconcile_readouts};
use crate::status::{BackoffPolicy, Connectivity, LinkState, StatusEvent, transition};
use crate::view::{ChartKind, ViewSink};

/// Requests accepted by a running engine.
#[derive(Debug)]
pub enum EngineCommand {
    /// Reset backoff for a target and poll it now.
    Retry { target_id: String },
    /// Report every target's link state.
    Inspect {
        reply: oneshot::Sender<Vec<TargetReport>>,
    },
}

/// Point-in-time view of one target's runtime state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub target_id: String,
    pub state: Connectivity,
    pub message: String,
    pub retry_count: u32,
    pub backoff_ms: u64,
    /// Milliseconds until the timer may poll again (0 = next tick).
    pub next_poll_in_ms: u64,
    pub in_flight: bool,
    pub overlay_visible: bool,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fast_interval: Duration,
    pub slow_interval: Duration,
    pub fetch_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub failure_overlay_threshold: u32,
    pub frame_interval: Duration,
    pub stats_log_interval: Duration,
}

impl EngineConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let p = &config.polling;
        Self {
            fast_interval: Duration::from_millis(p.fast_interval_ms),
            slow_interval: Duration::from_millis(p.slow_interval_ms),
            fetch_timeout: Duration::from_millis(p.fetch_timeout_ms),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(p.initial_backoff_ms),
                max: Duration::from_millis(p.max_backoff_ms),
            },
            failure_overlay_threshold: p.failure_overlay_threshold,
            frame_interval: Duration::from_millis(config.render.frame_interval_ms),
            stats_log_interval: Duration::from_secs(config.monitoring.stats_log_interval_secs),
        }
    }
}

/// Collaborators and channels for the engine task.
pub struct EngineDeps<F, S, V> {
    pub registry: Arc<TargetRegistry>,
    pub deduper: RequestDeduper<F>,
    /// Already restored from the durable store.
    pub history: HistoryStore<S>,
    pub view: V,
    /// `true` while the dashboard is in the foreground.
    pub visibility_rx: watch::Receiver<bool>,
    pub command_rx: mpsc::Receiver<EngineCommand>,
    /// Fires (or is dropped) on teardown.
    pub shutdown_rx: oneshot::Receiver<()>,
    pub series_persisted_total: Arc<AtomicU64>,
}

struct InFlightPoll {
    seq: u64,
    fetch: PendingFetch,
}

/// Runtime state of one target. Owned by the engine task only.
#[derive(Default)]
struct EngineState {
    link: LinkState,
    poll_seq: u64,
    in_flight: Option<InFlightPoll>,
    /// Issue time of the oldest poll nothing has answered yet.
    awaiting_since: Option<Instant>,
    render: RenderCache,
    disks: DiskListState,
}

struct PollCompletion {
    target: usize,
    seq: u64,
    result: Result<Sample, FetchError>,
}

#[derive(Debug, Default)]
struct EngineStats {
    polls_issued: u64,
    polls_superseded: u64,
    polls_expired: u64,
    stale_discarded: u64,
    successes: u64,
    failures: u64,
    chart_repaints: u64,
}

pub fn spawn<F, S, V>(deps: EngineDeps<F, S, V>, config: EngineConfig) -> tokio::task::JoinHandle<()>
where
    F: TelemetryFetcher,
    S: KvStore,
    V: ViewSink,
{
    let EngineDeps {
        registry,
        deduper,
        history,
        view,
        visibility_rx,
        command_rx,
        shutdown_rx,
        series_persisted_total,
    } = deps;
    let engine_span = tracing::span!(tracing::Level::DEBUG, "engine", targets = registry.len());
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let states = registry
        .targets()
        .iter()
        .map(|_| EngineState::default())
        .collect();
    let engine = Engine {
        charts: ChartQueue::new(config.frame_interval),
        registry,
        deduper,
        history,
        view,
        states,
        config,
        completion_tx,
        stats: EngineStats::default(),
        series_persisted_total,
    };
    tokio::spawn(
        engine
            .run(visibility_rx, command_rx, shutdown_rx, completion_rx)
            .instrument(engine_span),
    )
}

struct Engine<F, S, V> {
    registry: Arc<TargetRegistry>,
    deduper: RequestDeduper<F>,
    history: HistoryStore<S>,
    view: V,
    states: Vec<EngineState>,
    charts: ChartQueue,
    config: EngineConfig,
    completion_tx: mpsc::UnboundedSender<PollCompletion>,
    stats: EngineStats,
    series_persisted_total: Arc<AtomicU64>,
}

impl<F, S, V> Engine<F, S, V>
where
    F: TelemetryFetcher,
    S: KvStore,
    V: ViewSink,
{
    async fn run(
        mut self,
        mut visibility_rx: watch::Receiver<bool>,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        mut shutdown_rx: oneshot::Receiver<()>,
        mut completion_rx: mpsc::UnboundedReceiver<PollCompletion>,
    ) {
        self.seed_view();

        let mut visible = *visibility_rx.borrow_and_update();
        let mut visibility_open = true;
        let mut commands_open = true;

        // First tick fires immediately: every target is polled at startup.
        let mut tick = interval(self.cadence(visible));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_tick = interval_at(
            Instant::now() + self.config.stats_log_interval,
            self.config.stats_log_interval,
        );
        stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let frame_deadline = self.charts.deadline();
            tokio::select! {
                at = tick.tick() => {
                    self.tick_all(at);
                }
                Some(done) = completion_rx.recv() => {
                    self.on_completion(done);
                }
                _ = sleep_until(frame_deadline.unwrap_or_else(Instant::now)), if frame_deadline.is_some() => {
                    self.flush_charts(Instant::now());
                }
                changed = visibility_rx.changed(), if visibility_open => {
                    if changed.is_err() {
                        tracing::debug!("visibility signal closed; keeping current cadence");
                        visibility_open = false;
                        continue;
                    }
                    let now_visible = *visibility_rx.borrow_and_update();
                    if now_visible == visible {
                        continue;
                    }
                    visible = now_visible;
                    let cadence = self.cadence(visible);
                    tracing::debug!(visible, cadence_ms = cadence.as_millis() as u64, "cadence changed");
                    tick = interval_at(Instant::now() + cadence, cadence);
                    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    if visible {
                        self.tick_all(Instant::now());
                    }
                }
                cmd = command_rx.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd),
                        None => commands_open = false,
                    }
                }
                _ = stats_tick.tick() => {
                    self.log_stats();
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Engine shutting down");
                    break;
                }
            }
        }

        self.teardown();
    }

    fn cadence(&self, visible: bool) -> Duration {
        if visible {
            self.config.fast_interval
        } else {
            self.config.slow_interval
        }
    }

    /// Initial status for every target, then whatever was restored from storage:
    /// the last sample into readouts and disk list, series into the charts.
    fn seed_view(&mut self) {
        let threshold = self.config.failure_overlay_threshold;
        for (idx, target) in self.registry.targets().iter().enumerate() {
            let state = &mut self.states[idx];
            self.view
                .set_status(&target.id, state.link.connectivity, &state.link.message());
            self.view
                .set_overlay(&target.id, state.link.overlay_visible(threshold));
            self.view.set_loading(&target.id, true);

            if let Some(sample) = self.history.last_sample(&target.id) {
                reconcile_readouts(&mut self.view, &target.id, &mut state.render, sample);
                reconcile_disks(&mut self.view, &target.id, &mut state.disks, &sample.disks);
            }
            for chart in ChartKind::ALL {
                let series = chart_series(&self.history, &target.id, chart);
                if series.iter().any(|s| !s.is_empty()) {
                    self.view.paint_chart(&target.id, chart, series);
                }
            }
        }
    }

    fn tick_all(&mut self, now: Instant) {
        for idx in 0..self.states.len() {
            if self.poll_overdue(idx, now) {
                self.expire_poll(idx);
            }
            if !self.states[idx].link.may_poll(now) {
                tracing::trace!(target_id = %self.registry.targets()[idx].id, "in backoff; skipping tick");
                continue;
            }
            self.start_poll(idx, now);
        }
    }

    fn poll_overdue(&self, idx: usize, now: Instant) -> bool {
        let state = &self.states[idx];
        state.in_flight.is_some()
            && state
                .awaiting_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.config.fetch_timeout)
    }

    /// The target has not answered within `fetch_timeout` across however many
    /// polls superseded each other: drop the outstanding one and count a timeout.
    fn expire_poll(&mut self, idx: usize) {
        let state = &mut self.states[idx];
        if let Some(poll) = state.in_flight.take() {
            poll.fetch.cancel();
        }
        state.awaiting_since = None;
        self.stats.polls_expired += 1;
        self.on_failure(idx, FetchError::Timeout);
    }

    /// Supersede any outstanding poll for the target and issue a new one.
    fn start_poll(&mut self, idx: usize, now: Instant) {
        let target = &self.registry.targets()[idx];
        let state = &mut self.states[idx];
        if let Some(prev) = state.in_flight.take() {
            prev.fetch.cancel();
            self.stats.polls_superseded += 1;
            tracing::debug!(target_id = %target.id, seq = prev.seq, "superseding in-flight poll");
        }
        state.awaiting_since.get_or_insert(now);
        state.poll_seq += 1;
        let seq = state.poll_seq;
        let fetch = self
            .deduper
            .fetch_once(&target.endpoint, self.config.fetch_timeout);
        state.in_flight = Some(InFlightPoll {
            seq,
            fetch: fetch.clone(),
        });
        self.stats.polls_issued += 1;

        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = fetch.wait().await;
            // Receiver gone means the engine was torn down.
            let _ = tx.send(PollCompletion {
                target: idx,
                seq,
                result,
            });
        });
    }

    fn on_completion(&mut self, done: PollCompletion) {
        let Some(state) = self.states.get_mut(done.target) else {
            return;
        };
        if state.in_flight.as_ref().is_none_or(|p| p.seq != done.seq) {
            self.stats.stale_discarded += 1;
            tracing::trace!(target_index = done.target, seq = done.seq, "discarding superseded poll result");
            return;
        }
        state.in_flight = None;
        if !matches!(done.result, Err(FetchError::Cancelled)) {
            state.awaiting_since = None;
        }

        match done.result {
            Ok(sample) => self.on_success(done.target, sample),
            // Another target sharing this endpoint cancelled the joined request;
            // the next tick polls again.
            Err(FetchError::Cancelled) => {
                tracing::debug!(target_index = done.target, "poll cancelled before completing");
            }
            Err(e) => self.on_failure(done.target, e),
        }
    }

    fn on_success(&mut self, idx: usize, sample: Sample) {
        let now = Instant::now();
        self.stats.successes += 1;
        self.apply_event(idx, StatusEvent::Succeeded, now);

        let target_id = self.registry.targets()[idx].id.as_str();
        self.history.record_sample(target_id, &sample);

        let state = &mut self.states[idx];
        let writes = reconcile_readouts(&mut self.view, target_id, &mut state.render, &sample);
        let disks = reconcile_disks(&mut self.view, target_id, &mut state.disks, &sample.disks);
        for chart in ChartKind::ALL {
            self.charts.mark(idx, chart, now);
        }
        tracing::trace!(target_id, readout_writes = writes, ?disks, "sample applied");
    }

    fn on_failure(&mut self, idx: usize, error: FetchError) {
        let now = Instant::now();
        self.stats.failures += 1;
        let registry = self.registry.clone();
        let target_id = &registry.targets()[idx].id;
        tracing::debug!(target_id = %target_id, error = %error, operation = "poll", "poll failed");
        self.apply_event(idx, StatusEvent::Failed(error), now);

        let link = &self.states[idx].link;
        if link.retry_count == self.config.failure_overlay_threshold {
            tracing::warn!(
                target_id = %target_id,
                retry_count = link.retry_count,
                backoff_ms = link.backoff.as_millis() as u64,
                "target unreachable; showing error overlay"
            );
        }
    }

    /// Run the state machine and write the status slots that changed.
    fn apply_event(&mut self, idx: usize, event: StatusEvent, now: Instant) {
        let threshold = self.config.failure_overlay_threshold;
        let target_id = &self.registry.targets()[idx].id;
        let state = &mut self.states[idx];
        let prev = std::mem::take(&mut state.link);
        state.link = transition(&prev, event, &self.config.backoff, now);

        let message = state.link.message();
        if prev.connectivity != state.link.connectivity || prev.message() != message {
            self.view
                .set_status(target_id, state.link.connectivity, &message);
        }
        let overlay = state.link.overlay_visible(threshold);
        if prev.overlay_visible(threshold) != overlay {
            self.view.set_overlay(target_id, overlay);
        }
    }

    fn on_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Retry { target_id } => {
                let Some(idx) = self.registry.index_of(&target_id) else {
                    tracing::debug!(target_id = %target_id, "retry for unknown target ignored");
                    return;
                };
                tracing::info!(target_id = %target_id, "manual retry");
                let now = Instant::now();
                self.apply_event(idx, StatusEvent::ManualRetry, now);
                self.states[idx].awaiting_since = None;
                self.start_poll(idx, now);
            }
            EngineCommand::Inspect { reply } => {
                let _ = reply.send(self.reports(Instant::now()));
            }
        }
    }

    fn reports(&self, now: Instant) -> Vec<TargetReport> {
        let threshold = self.config.failure_overlay_threshold;
        self.registry
            .targets()
            .iter()
            .zip(&self.states)
            .map(|(target, state)| TargetReport {
                target_id: target.id.clone(),
                state: state.link.connectivity,
                message: state.link.message(),
                retry_count: state.link.retry_count,
                backoff_ms: state.link.backoff.as_millis() as u64,
                next_poll_in_ms: state
                    .link
                    .next_allowed_at
                    .map(|at| at.saturating_duration_since(now).as_millis() as u64)
                    .unwrap_or(0),
                in_flight: state.in_flight.is_some(),
                overlay_visible: state.link.overlay_visible(threshold),
            })
            .collect()
    }

    fn flush_charts(&mut self, now: Instant) {
        for (idx, chart) in self.charts.take_due(now) {
            let target_id = &self.registry.targets()[idx].id;
            let series = chart_series(&self.history, target_id, chart);
            self.view.paint_chart(target_id, chart, series);
            self.stats.chart_repaints += 1;
        }
    }

    fn log_stats(&self) {
        let connected = self
            .states
            .iter()
            .filter(|s| s.link.connectivity == Connectivity::Connected)
            .count();
        let erroring = self
            .states
            .iter()
            .filter(|s| s.link.connectivity == Connectivity::Error)
            .count();
        tracing::info!(
            targets_connected = connected,
            targets_erroring = erroring,
            polls_issued = self.stats.polls_issued,
            polls_superseded = self.stats.polls_superseded,
            polls_expired = self.stats.polls_expired,
            stale_discarded = self.stats.stale_discarded,
            successes = self.stats.successes,
            failures = self.stats.failures,
            chart_repaints = self.stats.chart_repaints,
            series_persisted_total = self.series_persisted_total.load(Ordering::Relaxed),
            "engine stats"
        );
    }

    /// Cancel every outstanding poll, drop pending repaints and hand the latest
    /// series to the writer. Nothing is written to the view after this.
    fn teardown(&mut self) {
        for state in &mut self.states {
            if let Some(poll) = state.in_flight.take() {
                poll.fetch.cancel();
            }
        }
        self.charts.clear();
        self.history.flush_all();
        tracing::info!(
            polls_issued = self.stats.polls_issued,
            successes = self.stats.successes,
            failures = self.stats.failures,
            "engine stopped"
        );
    }
}

fn chart_series<S: KvStore>(history: &HistoryStore<S>, target_id: &str, chart: ChartKind) -> Vec<Vec<f64>> {
    chart
        .metrics()
        .iter()
        .map(|&metric| {
            history
                .series(target_id, metric)
                .map(|s| s.to_vec())
                .unwrap_or_default()
        })
        .collect()
}
