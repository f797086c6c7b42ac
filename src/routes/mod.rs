// HTTP status routes

mod http;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::engine::RunBoard;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) board: RunBoard,
    pub(crate) config: AppConfig,
}

pub fn app(board: RunBoard, config: AppConfig) -> Router {
    let state = AppState { board, config };
    Router::new()
        .route("/", get(|| async { "batch-analytics scheduler" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/health", get(http::health_handler)) // GET /health
        .route("/api/runs", get(http::runs_handler)) // GET /api/runs
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
