use anyhow::Result;
use enrichment::RecoveryCandidate;
use tracing::info;

use super::Store;

impl Store {
    /// Persist the audit trail of website recovery in one transaction:
    /// every candidate is recorded, the chosen one flagged, and the
    /// venue's website set.
    pub async fn record_recovery(
        &self,
        venue_id: &str,
        candidates: &[RecoveryCandidate],
        chosen_url: Option<&str>,
    ) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await?;

        for candidate in candidates {
            sqlx::query(
                r#"
                INSERT INTO recovery_candidates (venue_id, url, confidence, method, is_chosen)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (venue_id, url) DO UPDATE SET
                    confidence = EXCLUDED.confidence,
                    method = EXCLUDED.method,
                    is_chosen = EXCLUDED.is_chosen
                "#,
            )
            .bind(venue_id)
            .bind(&candidate.url)
            .bind(candidate.confidence as f32)
            .bind(candidate.method.as_str())
            .bind(Some(candidate.url.as_str()) == chosen_url)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(url) = chosen_url {
            sqlx::query("UPDATE venues SET website = $1 WHERE venue_id = $2")
                .bind(url)
                .bind(venue_id)
                .execute(&mut *tx)
                .await?;
            info!(venue_id, website = url, "recovered venue website");
        }

        tx.commit().await?;
        Ok(())
    }
}
