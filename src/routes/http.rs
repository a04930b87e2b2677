// GET handlers: version, targets, dashboard, badges; POST retry

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::scheduler::{EngineCommand, TargetReport};

/// Package version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name (from Cargo.toml).
pub const NAME: &str = env!("CARGO_PKG_NAME");

const INSPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetEntry {
    id: String,
    name: String,
    endpoint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<TargetReport>,
}

/// GET /api/targets — registry plus live link state (omitted if the engine is gone).
pub(super) async fn targets_handler(State(state): State<AppState>) -> impl IntoResponse {
    let reports = inspect(&state).await.unwrap_or_default();
    let entries: Vec<TargetEntry> = state
        .deps
        .registry
        .targets()
        .iter()
        .map(|t| TargetEntry {
            id: t.id.clone(),
            name: t.display_name.clone(),
            endpoint: t.endpoint.clone(),
            description: t.description.clone(),
            link: reports.iter().find(|r| r.target_id == t.id).cloned(),
        })
        .collect();
    Json(entries)
}

async fn inspect(state: &AppState) -> Option<Vec<TargetReport>> {
    let (reply, rx) = oneshot::channel();
    state
        .deps
        .commands
        .send(EngineCommand::Inspect { reply })
        .await
        .ok()?;
    timeout(INSPECT_TIMEOUT, rx).await.ok()?.ok()
}

/// GET /api/dashboard — current mirror of every view slot.
pub(super) async fn dashboard_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.deps.view.snapshot())
}

/// GET /api/badges — latest badge per target.
pub(super) async fn badges_handler(State(state): State<AppState>) -> impl IntoResponse {
    let board = state.deps.badges.borrow().clone();
    Json(board)
}

/// POST /api/targets/{id}/retry — reset backoff and poll now.
pub(super) async fn retry_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.deps.registry.get(&id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown target {id}") })),
        );
    }
    match state
        .deps
        .commands
        .send(EngineCommand::Retry {
            target_id: id.clone(),
        })
        .await
    {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "retry": id })),
        ),
        Err(_) => {
            tracing::warn!(target_id = %id, operation = "retry", "engine not running");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "engine not running" })),
            )
        }
    }
}
