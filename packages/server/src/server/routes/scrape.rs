use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::JobMode;

use super::super::AppState;
use super::ApiError;

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub venue_ids: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub priority: Option<i32>,
}

fn default_mode() -> String {
    "realtime".to_string()
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub job_ids: Vec<i64>,
}

pub async fn scrape_handler(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    if req.venue_ids.is_empty() {
        return Err(ApiError::BadRequest("venue_ids must not be empty".to_string()));
    }
    let mode = JobMode::parse(&req.mode)
        .ok_or_else(|| ApiError::BadRequest("mode must be realtime or background".to_string()))?;
    let priority = req.priority.unwrap_or_else(|| mode.default_priority());

    let mut job_ids = Vec::with_capacity(req.venue_ids.len());
    for venue_id in &req.venue_ids {
        if state.store.get_venue(venue_id).await?.is_none() {
            return Err(ApiError::BadRequest(format!("unknown venue: {venue_id}")));
        }
        let result = state.store.enqueue_job(venue_id, mode, priority).await?;
        job_ids.push(result.job_id());
    }

    Ok(Json(ScrapeResponse { job_ids }))
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: i64,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_fields: Option<Vec<&'static str>>,
}

pub async fn job_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let Some(job) = state.store.get_job(job_id).await? else {
        return Err(ApiError::NotFound("job not found".to_string()));
    };

    // On success, report which fields the job's run actually refreshed.
    let updated_fields = match (job.state.as_str(), job.started_at) {
        ("success", Some(started_at)) => state
            .store
            .get_enrichment(&job.venue_id)
            .await?
            .map(|row| row.fields_updated_since(started_at)),
        _ => None,
    };

    Ok(Json(JobStatusResponse {
        job_id: job.job_id,
        state: job.state,
        started_at: job.started_at,
        finished_at: job.finished_at,
        error: job.error,
        updated_fields,
    }))
}
