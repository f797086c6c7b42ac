// GET handlers: version, health, api/runs

use axum::{extract::State, response::IntoResponse};

use super::AppState;
use crate::engine::{JobRunStatus, RunOutcome};

/// Package name (from Cargo.toml).
const NAME: &str = env!("CARGO_PKG_NAME");
/// Package version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GET /version returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /health reports liveness plus a count of jobs whose latest run did not succeed.
pub(super) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let board = state.board.read().await;
    let failing = board
        .values()
        .filter(|s| s.outcome != RunOutcome::Succeeded)
        .count();
    axum::Json(serde_json::json!({
        "status": "ok",
        "jobsTracked": board.len(),
        "jobsFailing": failing,
        "tickIntervalSecs": state.config.scheduler.tick_interval_secs,
    }))
}

/// GET /api/runs returns the latest run of each job, ordered by job name.
pub(super) async fn runs_handler(State(state): State<AppState>) -> impl IntoResponse {
    let runs: Vec<JobRunStatus> = state.board.read().await.values().cloned().collect();
    axum::Json(runs)
}
