use std::collections::HashMap;

use anyhow::Result;
use pgvector::Vector;
use sqlx::FromRow;

use super::{EnrichmentRow, Store};

pub const EMBEDDING_DIM: usize = 384;

#[derive(Debug, Clone, FromRow)]
pub struct SimilarityHit {
    pub venue_id: String,
    pub distance: f64,
}

impl Store {
    pub async fn upsert_embedding(
        &self,
        venue_id: &str,
        vector: Vec<f32>,
        valid_days: i64,
    ) -> Result<()> {
        anyhow::ensure!(
            vector.len() == EMBEDDING_DIM,
            "embedding must have {EMBEDDING_DIM} dimensions, got {}",
            vector.len()
        );
        sqlx::query(
            r#"
            INSERT INTO embeddings (venue_id, vector, valid_until, updated_at)
            VALUES ($1, $2, NOW() + ($3 || ' days')::interval, NOW())
            ON CONFLICT (venue_id) DO UPDATE SET
                vector = EXCLUDED.vector,
                valid_until = EXCLUDED.valid_until,
                updated_at = NOW()
            "#,
        )
        .bind(venue_id)
        .bind(Vector::from(vector))
        .bind(valid_days.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Cosine distance of the given venues to `query_vector`; venues
    /// without a stored embedding are simply absent from the result.
    pub async fn rank_by_similarity(
        &self,
        query_vector: Vec<f32>,
        venue_ids: &[String],
    ) -> Result<HashMap<String, f64>> {
        let hits = sqlx::query_as::<_, SimilarityHit>(
            r#"
            SELECT venue_id, (vector <=> $1)::float8 AS distance
            FROM embeddings
            WHERE venue_id = ANY($2)
              AND (valid_until IS NULL OR valid_until > NOW())
            "#,
        )
        .bind(Vector::from(query_vector))
        .bind(venue_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(hits.into_iter().map(|h| (h.venue_id, h.distance)).collect())
    }

    /// Enrichment rows that carry enough text to embed but whose embedding
    /// is missing or expired. Only venues with a minimum amount of
    /// enrichment text get embeddings.
    pub async fn enrichment_needing_embedding(
        &self,
        min_text_chars: i32,
        limit: i64,
    ) -> Result<Vec<EnrichmentRow>> {
        let rows = sqlx::query_as::<_, EnrichmentRow>(
            r#"
            SELECT e.venue_id, e.hours, e.hours_last_updated, e.contact, e.contact_last_updated,
                   e.description, e.description_last_updated, e.features, e.features_last_updated,
                   e.menu_url, e.menu_items, e.menu_last_updated, e.price_range,
                   e.price_last_updated, e.amenities, e.amenities_last_updated, e.fees,
                   e.fees_not_applicable, e.fees_last_updated, e.address_components, e.sources
            FROM enrichment e
            LEFT JOIN embeddings emb USING (venue_id)
            WHERE length(COALESCE(e.description, '')) >= $1
              AND (emb.venue_id IS NULL OR emb.valid_until < NOW()
                   OR emb.updated_at < e.updated_at)
            ORDER BY e.updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(min_text_chars)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
