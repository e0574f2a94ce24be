//! HTTP surface: query, scrape, and probe endpoints.

pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::config::Config;
use crate::embedder::EmbeddingClient;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<Config>,
    /// Query-vector backend; `None` falls back to popularity + distance
    /// ordering.
    pub embedder: Option<Arc<dyn EmbeddingClient>>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/query", post(routes::query::query_handler))
        .route("/scrape", post(routes::scrape::scrape_handler))
        .route("/scrape/:job_id", get(routes::scrape::job_status_handler))
        .route("/health", get(routes::health::health_handler))
        .route("/ready", get(routes::health::ready_handler))
        .with_state(state)
}
