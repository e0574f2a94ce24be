//! Embedding producer: turns enriched venue text into fixed-dimension
//! vectors via an OpenAI-compatible embeddings endpoint.
//!
//! The producer is optional end to end. The query path ranks by
//! popularity and distance whenever a vector is missing, so failures here
//! never surface to users.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::store::{EnrichmentRow, Store, Venue, EMBEDDING_DIM};

/// Venues need at least this much description text before embedding.
pub const MIN_TEXT_CHARS: i32 = 200;
const EMBEDDING_VALID_DAYS: i64 = 30;
const BATCH_SIZE: usize = 16;
const MAX_RETRIES: u32 = 2;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
    fn model(&self) -> &str;
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        match &config.embedding_api_url {
            None => Ok(None),
            Some(url) => Ok(Some(Self::new(
                url,
                config.embedding_api_key.clone(),
                &config.embedding_model,
            )?)),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: EMBEDDING_DIM,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut call = self.client.post(&self.endpoint).json(&request);
            if let Some(key) = &self.api_key {
                call = call.bearer_auth(key);
            }

            match call.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let mut parsed: EmbeddingResponse =
                        resp.json().await.context("failed to parse embedding response")?;
                    parsed.data.sort_by_key(|e| e.index);
                    anyhow::ensure!(
                        parsed.data.len() == inputs.len(),
                        "backend returned {} embeddings for {} inputs",
                        parsed.data.len(),
                        inputs.len()
                    );
                    return Ok(parsed.data.into_iter().map(|e| e.embedding).collect());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt > MAX_RETRIES {
                        anyhow::bail!("embedding backend returned {status}");
                    }
                    warn!(%status, attempt, "embedding request rejected, retrying");
                }
                Err(e) => {
                    if attempt > MAX_RETRIES {
                        return Err(e).context("embedding request failed");
                    }
                    warn!(error = %e, attempt, "embedding request failed, retrying");
                }
            }
            tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// The text a venue is embedded from: name, category, and its enriched
/// facts, all verbatim.
pub fn embedding_text(venue: &Venue, enrichment: &EnrichmentRow) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(venue.name.clone());
    if let Some(category) = &venue.category_name {
        parts.push(category.clone());
    }
    if let Some(description) = &enrichment.description {
        parts.push(description.clone());
    }
    for list in [&enrichment.features, &enrichment.amenities] {
        if let Some(values) = list.as_ref().and_then(|v| v.as_array()) {
            let joined = values
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if !joined.is_empty() {
                parts.push(joined);
            }
        }
    }
    if let Some(price_range) = &enrichment.price_range {
        parts.push(price_range.clone());
    }
    parts.join("\n")
}

pub struct EmbeddingProducer {
    store: Store,
    client: Box<dyn EmbeddingClient>,
    sleep: Duration,
}

impl EmbeddingProducer {
    pub fn new(store: Store, client: Box<dyn EmbeddingClient>, sleep: Duration) -> Self {
        Self { store, client, sleep }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(model = self.client.model(), "embedding producer starting");

        while !shutdown.is_cancelled() {
            match self.run_cycle().await {
                Ok(0) => {}
                Ok(n) => info!(embedded = n, "embedding cycle complete"),
                Err(e) => error!(error = %e, "embedding cycle failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.sleep) => {}
            }
        }

        info!("embedding producer stopped");
        Ok(())
    }

    pub async fn run_cycle(&self) -> Result<usize> {
        let rows = self
            .store
            .enrichment_needing_embedding(MIN_TEXT_CHARS, BATCH_SIZE as i64)
            .await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let venue_ids: Vec<String> = rows.iter().map(|r| r.venue_id.clone()).collect();
        let venues = self.store.get_venues(&venue_ids).await?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut texts = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(venue) = venues.iter().find(|v| v.venue_id == row.venue_id) else {
                continue;
            };
            ids.push(row.venue_id.clone());
            texts.push(embedding_text(venue, row));
        }

        let vectors = self.client.embed_batch(&texts).await?;
        let mut written = 0;
        for (venue_id, vector) in ids.iter().zip(vectors) {
            match self
                .store
                .upsert_embedding(venue_id, vector, EMBEDDING_VALID_DAYS)
                .await
            {
                Ok(()) => written += 1,
                Err(e) => warn!(venue_id, error = %e, "failed to store embedding"),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn embedding_text_concatenates_enriched_fields() {
        let venue = Venue {
            venue_id: "v1".to_string(),
            name: "The Olive Tree".to_string(),
            category_name: Some("Restaurant".to_string()),
            latitude: 0.0,
            longitude: 0.0,
            website: None,
            email: None,
            phone: None,
            popularity: None,
            last_enriched_at: None,
        };
        let row = EnrichmentRow {
            venue_id: "v1".to_string(),
            hours: None,
            hours_last_updated: None,
            contact: None,
            contact_last_updated: None,
            description: Some("Family-run trattoria on the quay.".to_string()),
            description_last_updated: None,
            features: Some(json!(["Terrace", "Dog friendly"])),
            features_last_updated: None,
            menu_url: None,
            menu_items: None,
            menu_last_updated: None,
            price_range: Some("££".to_string()),
            price_last_updated: None,
            amenities: None,
            amenities_last_updated: None,
            fees: None,
            fees_not_applicable: false,
            fees_last_updated: None,
            address_components: None,
            sources: json!({}),
        };

        let text = embedding_text(&venue, &row);
        assert!(text.contains("The Olive Tree"));
        assert!(text.contains("trattoria"));
        assert!(text.contains("Terrace, Dog friendly"));
        assert!(text.contains("££"));
    }
}
