// HTTP + WebSocket routes

mod http;
mod ws;

pub use ws::ForegroundTracker;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};

use crate::badges::BadgeBoard;
use crate::registry::TargetRegistry;
use crate::scheduler::EngineCommand;
use crate::view::BroadcastView;

/// Handles the routes need into the running engine.
#[derive(Clone)]
pub struct RouteDeps {
    pub view: BroadcastView,
    pub registry: Arc<TargetRegistry>,
    pub commands: mpsc::Sender<EngineCommand>,
    /// Feeds the engine's visibility signal from the connected dashboards.
    pub foreground: Arc<ForegroundTracker>,
    pub badges: watch::Receiver<BadgeBoard>,
    pub ws_connections: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) deps: RouteDeps,
}

pub fn app(deps: RouteDeps) -> Router {
    let state = AppState { deps };
    Router::new()
        .route("/", get(|| async { "telemetry-sync: dashboard engine up" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/targets", get(http::targets_handler)) // GET /api/targets
        .route("/api/dashboard", get(http::dashboard_handler)) // GET /api/dashboard
        .route("/api/badges", get(http::badges_handler)) // GET /api/badges
        .route("/api/targets/{id}/retry", post(http::retry_handler)) // POST /api/targets/{id}/retry
        .route("/ws/dashboard", get(ws::ws_dashboard)) // WS /ws/dashboard
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
