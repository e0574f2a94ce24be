use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::freshness::{should_trigger_realtime, FreshnessReport, FreshnessWindows};
use crate::store::{GeoHit, JobMode, Venue, REALTIME_PRIORITY};

use super::super::AppState;
use super::ApiError;

const MIN_RADIUS_M: i32 = 1;
const MAX_RADIUS_M: i32 = 100_000;
const DEFAULT_LIMIT: i64 = 15;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: Option<i32>,
    pub limit: Option<i64>,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Freshness {
    #[serde(flatten)]
    pub report: FreshnessReport,
    pub last_enriched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ResultCard {
    pub venue_id: String,
    pub name: String,
    pub category_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub distance_m: i64,
    pub popularity: Option<f32>,
    pub freshness: Freshness,
    pub sources_count: usize,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<ResultCard>,
}

pub async fn query_handler(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let radius_m = req.radius_m.unwrap_or(state.config.query_default_radius_m);
    if !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&radius_m) {
        return Err(ApiError::BadRequest(format!(
            "radius_m must be within [{MIN_RADIUS_M}, {MAX_RADIUS_M}]"
        )));
    }
    let limit = req.limit.unwrap_or(DEFAULT_LIMIT);
    if limit < 1 || limit > state.config.query_max_results {
        return Err(ApiError::BadRequest(format!(
            "limit must be within [1, {}]",
            state.config.query_max_results
        )));
    }

    let mut hits = state
        .store
        .geo_search(req.lat, req.lon, radius_m, limit, req.category.as_deref())
        .await?;

    // Semantic rerank when a vector backend is configured; venues without
    // an embedding keep a neutral distance so they are not dropped.
    if let Some(embedder) = &state.embedder {
        match embedder.embed_batch(&[req.query.clone()]).await {
            Ok(mut vectors) if !vectors.is_empty() => {
                let ids: Vec<String> = hits.iter().map(|h| h.venue_id.clone()).collect();
                let distances = state
                    .store
                    .rank_by_similarity(vectors.remove(0), &ids)
                    .await?;
                hits.sort_by(|a, b| {
                    let da = distances.get(&a.venue_id).copied().unwrap_or(0.5);
                    let db = distances.get(&b.venue_id).copied().unwrap_or(0.5);
                    da.partial_cmp(&db)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            b.popularity
                                .unwrap_or(0.0)
                                .partial_cmp(&a.popularity.unwrap_or(0.0))
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "query embedding failed, keeping geo order"),
        }
    }

    let venue_ids: Vec<String> = hits.iter().map(|h| h.venue_id.clone()).collect();
    let enrichment = state.store.get_enrichment_batch(&venue_ids).await?;
    let windows = FreshnessWindows::from_config(&state.config);

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let row = enrichment.get(&hit.venue_id);
        let venue = venue_from_hit(&hit);
        let (trigger, report) = should_trigger_realtime(&venue, row, windows);

        // Stale or missing facts enqueue a realtime crawl; the job id lets
        // callers poll for the refresh.
        let job_id = if trigger {
            match state
                .store
                .enqueue_job(&hit.venue_id, JobMode::Realtime, REALTIME_PRIORITY)
                .await
            {
                Ok(result) => Some(result.job_id()),
                Err(e) => {
                    warn!(venue_id = %hit.venue_id, error = %e, "failed to enqueue realtime job");
                    None
                }
            }
        } else {
            None
        };

        results.push(ResultCard {
            venue_id: hit.venue_id,
            name: hit.name,
            category_name: hit.category_name,
            lat: hit.latitude,
            lon: hit.longitude,
            distance_m: hit.distance_m.round() as i64,
            popularity: hit.popularity,
            freshness: Freshness {
                report,
                last_enriched_at: hit.last_enriched_at,
            },
            sources_count: row.map(|r| r.sources_count()).unwrap_or(0),
            summary: row.and_then(|r| r.description.clone()),
            job_id,
        });
    }

    Ok(Json(QueryResponse { results }))
}

fn venue_from_hit(hit: &GeoHit) -> Venue {
    Venue {
        venue_id: hit.venue_id.clone(),
        name: hit.name.clone(),
        category_name: hit.category_name.clone(),
        latitude: hit.latitude,
        longitude: hit.longitude,
        website: hit.website.clone(),
        email: None,
        phone: None,
        popularity: hit.popularity,
        last_enriched_at: hit.last_enriched_at,
    }
}
