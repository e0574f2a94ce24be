use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub db: &'static str,
    pub queue_depth: i64,
    pub version: &'static str,
}

pub async fn health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = state.store.ping().await;
    let queue_depth = match state.store.queue_depth().await {
        Ok(depth) => depth.pending,
        Err(_) => -1,
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            ok: db_ok,
            db: if db_ok { "ok" } else { "fail" },
            queue_depth,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub db: &'static str,
    pub model: String,
}

pub async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let db_ok = state.store.ping().await;
    let model = state
        .embedder
        .as_ref()
        .map(|e| e.model().to_string())
        .unwrap_or_else(|| "none".to_string());

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready: db_ok,
            db: if db_ok { "ok" } else { "fail" },
            model,
        }),
    )
}
