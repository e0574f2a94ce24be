use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use enrichment::EnrichmentUpdate;
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use tracing::debug;

use super::Store;

/// Per-venue fact row: one value + freshness timestamp per field, plus the
/// per-field source URL map.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EnrichmentRow {
    pub venue_id: String,
    pub hours: Option<Value>,
    pub hours_last_updated: Option<DateTime<Utc>>,
    pub contact: Option<Value>,
    pub contact_last_updated: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub description_last_updated: Option<DateTime<Utc>>,
    pub features: Option<Value>,
    pub features_last_updated: Option<DateTime<Utc>>,
    pub menu_url: Option<String>,
    pub menu_items: Option<Value>,
    pub menu_last_updated: Option<DateTime<Utc>>,
    pub price_range: Option<String>,
    pub price_last_updated: Option<DateTime<Utc>>,
    pub amenities: Option<Value>,
    pub amenities_last_updated: Option<DateTime<Utc>>,
    pub fees: Option<String>,
    pub fees_not_applicable: bool,
    pub fees_last_updated: Option<DateTime<Utc>>,
    pub address_components: Option<Value>,
    pub sources: Value,
}

const ENRICHMENT_COLUMNS: &str = r#"
    venue_id, hours, hours_last_updated, contact, contact_last_updated,
    description, description_last_updated, features, features_last_updated,
    menu_url, menu_items, menu_last_updated, price_range, price_last_updated,
    amenities, amenities_last_updated, fees, fees_not_applicable, fees_last_updated,
    address_components, sources
"#;

impl EnrichmentRow {
    fn empty(venue_id: &str) -> Self {
        Self {
            venue_id: venue_id.to_string(),
            hours: None,
            hours_last_updated: None,
            contact: None,
            contact_last_updated: None,
            description: None,
            description_last_updated: None,
            features: None,
            features_last_updated: None,
            menu_url: None,
            menu_items: None,
            menu_last_updated: None,
            price_range: None,
            price_last_updated: None,
            amenities: None,
            amenities_last_updated: None,
            fees: None,
            fees_not_applicable: false,
            fees_last_updated: None,
            address_components: None,
            sources: Value::Object(Default::default()),
        }
    }

    /// Count of distinct source URLs across all fields.
    pub fn sources_count(&self) -> usize {
        let Some(map) = self.sources.as_object() else {
            return 0;
        };
        let mut seen: Vec<&str> = Vec::new();
        for urls in map.values() {
            if let Some(urls) = urls.as_array() {
                for url in urls.iter().filter_map(Value::as_str) {
                    if !seen.contains(&url) {
                        seen.push(url);
                    }
                }
            }
        }
        seen.len()
    }

    /// Fields whose freshness timestamp is at or after `since`.
    pub fn fields_updated_since(&self, since: DateTime<Utc>) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let mut check = |name: &'static str, ts: &Option<DateTime<Utc>>| {
            if ts.map(|t| t >= since).unwrap_or(false) {
                fields.push(name);
            }
        };
        check("hours", &self.hours_last_updated);
        check("contact", &self.contact_last_updated);
        check("description", &self.description_last_updated);
        check("features", &self.features_last_updated);
        check("menu", &self.menu_last_updated);
        check("price_range", &self.price_last_updated);
        check("amenities", &self.amenities_last_updated);
        check("fees", &self.fees_last_updated);
        fields
    }

    /// Fold an update into this row, stamping touched fields with `now`.
    /// Untouched fields are left exactly as they were.
    fn apply(&mut self, update: &EnrichmentUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(hours) = &update.hours {
            self.hours = Some(serde_json::to_value(hours)?);
            self.hours_last_updated = Some(now);
        }
        if let Some(contact) = &update.contact {
            self.contact = Some(serde_json::to_value(contact)?);
            self.contact_last_updated = Some(now);
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
            self.description_last_updated = Some(now);
        }
        if let Some(features) = &update.features {
            self.features = Some(serde_json::to_value(features)?);
            self.features_last_updated = Some(now);
        }
        if update.menu_url.is_some() || update.menu_items.is_some() {
            if let Some(menu_url) = &update.menu_url {
                self.menu_url = Some(menu_url.clone());
            }
            if let Some(items) = &update.menu_items {
                self.menu_items = Some(serde_json::to_value(items)?);
            }
            self.menu_last_updated = Some(now);
        }
        if let Some(price_range) = &update.price_range {
            self.price_range = Some(price_range.clone());
            self.price_last_updated = Some(now);
        }
        if let Some(amenities) = &update.amenities {
            self.amenities = Some(serde_json::to_value(amenities)?);
            self.amenities_last_updated = Some(now);
        }
        if update.fees.is_some() || update.fees_not_applicable {
            self.fees = update.fees.clone();
            self.fees_not_applicable = update.fees_not_applicable;
            self.fees_last_updated = Some(now);
        }
        if let Some(address) = &update.address_components {
            self.address_components = Some(address.clone());
        }

        // Per-field source lists: append-dedup union, order preserved.
        let mut merged = self
            .sources
            .as_object()
            .cloned()
            .unwrap_or_default();
        for (field, urls) in &update.sources {
            let entry = merged
                .entry(field.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let list = entry.as_array_mut().expect("sources entry is an array");
            for url in urls {
                if !list.iter().any(|u| u.as_str() == Some(url)) {
                    list.push(Value::String(url.clone()));
                }
            }
        }
        self.sources = Value::Object(merged);
        Ok(())
    }
}

impl Store {
    pub async fn get_enrichment(&self, venue_id: &str) -> Result<Option<EnrichmentRow>> {
        let row = sqlx::query_as::<_, EnrichmentRow>(sqlx::AssertSqlSafe(format!(
            "SELECT {ENRICHMENT_COLUMNS} FROM enrichment WHERE venue_id = $1"
        )))
        .bind(venue_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn get_enrichment_batch(
        &self,
        venue_ids: &[String],
    ) -> Result<HashMap<String, EnrichmentRow>> {
        let rows = sqlx::query_as::<_, EnrichmentRow>(sqlx::AssertSqlSafe(format!(
            "SELECT {ENRICHMENT_COLUMNS} FROM enrichment WHERE venue_id = ANY($1)"
        )))
        .bind(venue_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|r| (r.venue_id.clone(), r)).collect())
    }

    /// Commit a job's result atomically: the enrichment merge, the venue's
    /// `last_enriched_at`, and the job's terminal state land in one
    /// transaction. Concurrent jobs on the same venue serialize on the
    /// enrichment row lock.
    pub async fn commit_job_result(
        &self,
        job_id: i64,
        venue_id: &str,
        update: Option<&EnrichmentUpdate>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();

        if let Some(update) = update.filter(|u| !u.is_empty()) {
            let existing = sqlx::query_as::<_, EnrichmentRow>(sqlx::AssertSqlSafe(format!(
                "SELECT {ENRICHMENT_COLUMNS} FROM enrichment WHERE venue_id = $1 FOR UPDATE"
            )))
            .bind(venue_id)
            .fetch_optional(&mut *tx)
            .await?;

            let mut row = existing.unwrap_or_else(|| EnrichmentRow::empty(venue_id));
            row.apply(update, now)?;

            sqlx::query(
                r#"
                INSERT INTO enrichment (
                    venue_id, hours, hours_last_updated, contact, contact_last_updated,
                    description, description_last_updated, features, features_last_updated,
                    menu_url, menu_items, menu_last_updated, price_range, price_last_updated,
                    amenities, amenities_last_updated, fees, fees_not_applicable,
                    fees_last_updated, address_components, sources, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                        $15, $16, $17, $18, $19, $20, $21, NOW())
                ON CONFLICT (venue_id) DO UPDATE SET
                    hours = EXCLUDED.hours,
                    hours_last_updated = EXCLUDED.hours_last_updated,
                    contact = EXCLUDED.contact,
                    contact_last_updated = EXCLUDED.contact_last_updated,
                    description = EXCLUDED.description,
                    description_last_updated = EXCLUDED.description_last_updated,
                    features = EXCLUDED.features,
                    features_last_updated = EXCLUDED.features_last_updated,
                    menu_url = EXCLUDED.menu_url,
                    menu_items = EXCLUDED.menu_items,
                    menu_last_updated = EXCLUDED.menu_last_updated,
                    price_range = EXCLUDED.price_range,
                    price_last_updated = EXCLUDED.price_last_updated,
                    amenities = EXCLUDED.amenities,
                    amenities_last_updated = EXCLUDED.amenities_last_updated,
                    fees = EXCLUDED.fees,
                    fees_not_applicable = EXCLUDED.fees_not_applicable,
                    fees_last_updated = EXCLUDED.fees_last_updated,
                    address_components = EXCLUDED.address_components,
                    sources = EXCLUDED.sources,
                    updated_at = NOW()
                "#,
            )
            .bind(venue_id)
            .bind(&row.hours)
            .bind(row.hours_last_updated)
            .bind(&row.contact)
            .bind(row.contact_last_updated)
            .bind(&row.description)
            .bind(row.description_last_updated)
            .bind(&row.features)
            .bind(row.features_last_updated)
            .bind(&row.menu_url)
            .bind(&row.menu_items)
            .bind(row.menu_last_updated)
            .bind(&row.price_range)
            .bind(row.price_last_updated)
            .bind(&row.amenities)
            .bind(row.amenities_last_updated)
            .bind(&row.fees)
            .bind(row.fees_not_applicable)
            .bind(row.fees_last_updated)
            .bind(&row.address_components)
            .bind(&row.sources)
            .execute(&mut *tx)
            .await?;

            debug!(venue_id, fields = ?update.updated_fields(), "enrichment merged");
        }

        match error {
            None => {
                sqlx::query("UPDATE venues SET last_enriched_at = $1 WHERE venue_id = $2")
                    .bind(now)
                    .bind(venue_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    r#"
                    UPDATE crawl_jobs
                    SET state = 'success', finished_at = NOW(), error = NULL
                    WHERE job_id = $1 AND state = 'running'
                    "#,
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            Some(error) => {
                let error: String = error.chars().take(2000).collect();
                sqlx::query(
                    r#"
                    UPDATE crawl_jobs
                    SET state = 'fail', finished_at = NOW(), error = $1
                    WHERE job_id = $2 AND state = 'running'
                    "#,
                )
                .bind(error)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn update_with_hours() -> EnrichmentUpdate {
        let mut sources = BTreeMap::new();
        sources.insert("hours".to_string(), vec!["https://v.example/hours".to_string()]);
        EnrichmentUpdate {
            hours: Some(enrichment::extract::hours::HoursMap::default()),
            sources,
            ..Default::default()
        }
    }

    #[test]
    fn apply_stamps_touched_fields_only() {
        let mut row = EnrichmentRow::empty("v1");
        row.description = Some("old".to_string());
        let old_ts = Utc::now() - chrono::Duration::days(10);
        row.description_last_updated = Some(old_ts);

        let now = Utc::now();
        row.apply(&update_with_hours(), now).unwrap();

        assert_eq!(row.hours_last_updated, Some(now));
        assert_eq!(row.description.as_deref(), Some("old"));
        assert_eq!(row.description_last_updated, Some(old_ts));
    }

    #[test]
    fn sources_are_append_dedup_union() {
        let mut row = EnrichmentRow::empty("v1");
        let now = Utc::now();
        row.apply(&update_with_hours(), now).unwrap();
        row.apply(&update_with_hours(), now).unwrap();

        let urls = row.sources["hours"].as_array().unwrap();
        assert_eq!(urls.len(), 1);
    }

    #[test]
    fn fields_updated_since_tracks_timestamps() {
        let mut row = EnrichmentRow::empty("v1");
        let now = Utc::now();
        row.apply(&update_with_hours(), now).unwrap();

        assert_eq!(
            row.fields_updated_since(now - chrono::Duration::seconds(1)),
            vec!["hours"]
        );
        assert!(row
            .fields_updated_since(now + chrono::Duration::seconds(1))
            .is_empty());
    }
}
