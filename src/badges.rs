// Status badge watcher: a slower, independent liveness check per target.
//
// Pings go through the same RequestDeduper as the scheduler, so a badge check
// that coincides with a poll of the same endpoint joins it instead of issuing a
// second call. Badges never touch the scheduler's link state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, interval};

use crate::fetch::{FetchError, RequestDeduper, TelemetryFetcher};
use crate::registry::TargetRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeState {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub state: BadgeState,
    pub message: String,
    pub checked_at: Option<DateTime<Utc>>,
}

impl Default for Badge {
    fn default() -> Self {
        Self {
            state: BadgeState::Unknown,
            message: "Checking…".into(),
            checked_at: None,
        }
    }
}

/// target id -> latest badge
pub type BadgeBoard = BTreeMap<String, Badge>;

#[derive(Debug, Clone, Copy)]
pub struct BadgeWatcherConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Board with every target in `Unknown`, plus the channel the watcher publishes on.
pub fn badge_board(registry: &TargetRegistry) -> (watch::Sender<BadgeBoard>, watch::Receiver<BadgeBoard>) {
    let board = registry
        .ids()
        .map(|id| (id.to_string(), Badge::default()))
        .collect();
    watch::channel(board)
}

pub fn spawn_badge_watcher<F: TelemetryFetcher>(
    registry: Arc<TargetRegistry>,
    deduper: RequestDeduper<F>,
    board_tx: watch::Sender<BadgeBoard>,
    config: BadgeWatcherConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let checks = registry.targets().iter().map(|target| {
                        let pending = deduper.fetch_once(&target.endpoint, config.timeout);
                        async move { (target.id.clone(), pending.wait().await) }
                    });
                    let results = join_all(checks).await;
                    let checked_at = Utc::now();
                    board_tx.send_modify(|board| {
                        for (target_id, result) in results {
                            apply_check(board, target_id, result, checked_at);
                        }
                    });
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Badge watcher shutting down");
                    break;
                }
            }
        }
    })
}

fn apply_check(
    board: &mut BadgeBoard,
    target_id: String,
    result: Result<crate::models::Sample, FetchError>,
    checked_at: DateTime<Utc>,
) {
    let badge = match result {
        Ok(_) => Badge {
            state: BadgeState::Online,
            message: "Online".into(),
            checked_at: Some(checked_at),
        },
        // A superseding poll aborted the shared call; keep the previous badge.
        Err(FetchError::Cancelled) => return,
        Err(e) => {
            tracing::debug!(target_id = %target_id, error = %e, "badge check failed");
            Badge {
                state: BadgeState::Offline,
                message: format!("Offline ({})", e.label()),
                checked_at: Some(checked_at),
            }
        }
    };
    board.insert(target_id, badge);
}
