// Per-target connectivity state machine.
//
// `transition` is a pure function of (state, event); the scheduler is the only
// caller. Failures back off exponentially: initial, 2x, 4x... capped at max.

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::fetch::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay after one more consecutive failure.
    pub fn next(&self, current: Duration) -> Duration {
        if current.is_zero() {
            self.initial.min(self.max)
        } else {
            current.saturating_mul(2).min(self.max)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkState {
    pub connectivity: Connectivity,
    /// Consecutive failed polls.
    pub retry_count: u32,
    pub backoff: Duration,
    /// No timer-driven poll before this instant.
    pub next_allowed_at: Option<Instant>,
    pub last_error: Option<FetchError>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Connecting,
            retry_count: 0,
            backoff: Duration::ZERO,
            next_allowed_at: None,
            last_error: None,
        }
    }
}

impl LinkState {
    pub fn may_poll(&self, now: Instant) -> bool {
        self.next_allowed_at.is_none_or(|at| now >= at)
    }

    /// Status text shown next to the indicator.
    pub fn message(&self) -> String {
        match self.connectivity {
            Connectivity::Connecting => "Connecting…".into(),
            Connectivity::Connected => "Connected".into(),
            Connectivity::Error => match &self.last_error {
                Some(e) => format!("Error – Retry {} ({})", self.retry_count, e.label()),
                None => format!("Error – Retry {}", self.retry_count),
            },
        }
    }

    pub fn overlay_visible(&self, threshold: u32) -> bool {
        self.connectivity == Connectivity::Error && self.retry_count >= threshold
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Succeeded,
    Failed(FetchError),
    ManualRetry,
}

pub fn transition(
    state: &LinkState,
    event: StatusEvent,
    policy: &BackoffPolicy,
    now: Instant,
) -> LinkState {
    match event {
        StatusEvent::Succeeded => LinkState {
            connectivity: Connectivity::Connected,
            ..LinkState::default()
        },
        StatusEvent::Failed(error) => {
            let backoff = policy.next(state.backoff);
            LinkState {
                connectivity: Connectivity::Error,
                retry_count: state.retry_count.saturating_add(1),
                backoff,
                next_allowed_at: Some(now + backoff),
                last_error: Some(error),
            }
        }
        StatusEvent::ManualRetry => LinkState {
            connectivity: match state.connectivity {
                Connectivity::Connected => Connectivity::Connected,
                _ => Connectivity::Connecting,
            },
            ..LinkState::default()
        },
    }
}
