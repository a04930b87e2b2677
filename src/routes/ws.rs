// WebSocket dashboard stream

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::scheduler::EngineCommand;
use crate::view::{BroadcastView, ViewPatch};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the dashboard connection count on drop (connect = +1, drop = -1).
struct WsConnectionGuard(Arc<AtomicUsize>);

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Folds the foreground state of every dashboard socket into the engine's
/// visibility signal. The dashboard counts as visible while at least one client
/// is foregrounded, or while no client is connected at all.
pub struct ForegroundTracker {
    tx: watch::Sender<bool>,
    counts: Mutex<ForegroundCounts>,
}

#[derive(Debug, Default)]
struct ForegroundCounts {
    clients: usize,
    hidden: usize,
}

impl ForegroundTracker {
    pub fn new(tx: watch::Sender<bool>) -> Self {
        Self {
            tx,
            counts: Mutex::new(ForegroundCounts::default()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ForegroundCounts)) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *counts);
        let visible = counts.clients == 0 || counts.hidden < counts.clients;
        self.tx.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        });
    }

    /// Register a new client; it counts as foregrounded until it says otherwise.
    fn join(self: &Arc<Self>) -> ForegroundVote {
        self.update(|c| c.clients += 1);
        ForegroundVote {
            tracker: self.clone(),
            hidden: false,
        }
    }
}

/// One client's say in the visibility signal; withdrawn on drop.
struct ForegroundVote {
    tracker: Arc<ForegroundTracker>,
    hidden: bool,
}

impl ForegroundVote {
    fn set_visible(&mut self, visible: bool) {
        let hidden = !visible;
        if hidden == self.hidden {
            return;
        }
        self.hidden = hidden;
        self.tracker.update(|c| {
            if hidden {
                c.hidden += 1;
            } else {
                c.hidden = c.hidden.saturating_sub(1);
            }
        });
    }
}

impl Drop for ForegroundVote {
    fn drop(&mut self) {
        let hidden = self.hidden;
        self.tracker.update(|c| {
            c.clients = c.clients.saturating_sub(1);
            if hidden {
                c.hidden = c.hidden.saturating_sub(1);
            }
        });
    }
}

/// Messages a browser may send on /ws/dashboard.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ClientMessage {
    Visibility { visible: bool },
    Retry { target_id: String },
}

pub(super) async fn ws_dashboard(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let deps = state.deps.clone();
    ws.on_upgrade(move |socket| async move {
        let session = Session {
            view: deps.view,
            commands: deps.commands,
            foreground: deps.foreground,
        };
        if let Err(e) = stream_dashboard(socket, session, deps.ws_connections).await {
            tracing::info!("Dashboard stream error: {}", e);
        }
    })
}

struct Session {
    view: BroadcastView,
    commands: mpsc::Sender<EngineCommand>,
    foreground: Arc<ForegroundTracker>,
}

async fn send_text(socket: &mut WebSocket, json: String) -> bool {
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
    matches!(r, Ok(Ok(())))
}

async fn stream_dashboard(
    mut socket: WebSocket,
    session: Session,
    conn_count: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    conn_count.fetch_add(1, Ordering::Relaxed);
    let _guard = WsConnectionGuard(conn_count);
    let mut vote = session.foreground.join();
    tracing::info!("Client connected to dashboard stream");

    let (mirror, mut rx) = session.view.subscribe();
    let welcome = serde_json::json!({ "type": "snapshot", "dashboard": mirror });
    if !send_text(&mut socket, serde_json::to_string(&welcome)?).await {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(patch) => {
                        if !send_text(&mut socket, serde_json::to_string(&patch)?).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/dashboard client lagged, skipped {} patches; resending snapshot", n);
                        let resync = serde_json::json!({ "type": "snapshot", "dashboard": session.view.snapshot() });
                        if !send_text(&mut socket, serde_json::to_string(&resync)?).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_client_message(&session, &mut vote, text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "dashboard socket receive failed");
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if !matches!(r, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn handle_client_message(session: &Session, vote: &mut ForegroundVote, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed client message");
            return;
        }
    };
    match msg {
        ClientMessage::Visibility { visible } => vote.set_visible(visible),
        ClientMessage::Retry { target_id } => {
            if session
                .commands
                .send(EngineCommand::Retry { target_id })
                .await
                .is_err()
            {
                tracing::debug!("retry dropped; engine not running");
            }
        }
    }
}
