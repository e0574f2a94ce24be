use anyhow::Result;
use chrono::{DateTime, Utc};
use enrichment::{PageRecord, PageType};
use sqlx::FromRow;
use tracing::debug;

use super::Store;

/// Row shape read back from `scraped_pages`.
#[derive(Debug, Clone, FromRow)]
pub struct PageRow {
    pub page_id: i64,
    pub venue_id: String,
    pub url: String,
    pub page_type: String,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub http_status: i32,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub cleaned_text: Option<String>,
    pub reason: String,
}

impl PageRow {
    /// Convert back to the crawler's record type (no raw HTML; only the
    /// cleaned text survives storage).
    pub fn into_record(self) -> PageRecord {
        PageRecord {
            url: self.url,
            page_type: self.page_type.parse().unwrap_or(PageType::Other),
            fetched_at: self.fetched_at,
            valid_until: self.valid_until,
            http_status: self.http_status,
            content_type: self.content_type,
            content_hash: self.content_hash,
            cleaned_text: self.cleaned_text,
            discovered_via: enrichment::DiscoveryMethod::Heuristic,
            redirect_chain: Vec::new(),
            reason: self.reason.parse().unwrap_or(enrichment::PageReason::Ok),
            size_bytes: 0,
            total_ms: 0,
            first_byte_ms: 0,
        }
    }
}

/// Outcome of persisting one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredPage {
    Inserted(i64),
    /// An identical body already existed (possibly under another venue);
    /// that row was refreshed and is the one to cite.
    Deduplicated(i64),
}

impl Store {
    /// Persist one crawled page. Bodies are globally deduplicated by
    /// content hash: refetching identical content refreshes the existing
    /// row instead of creating a new one.
    pub async fn upsert_page(&self, venue_id: &str, record: &PageRecord) -> Result<StoredPage> {
        let mut tx = self.pool().begin().await?;

        if let Some(hash) = &record.content_hash {
            let existing: Option<(i64,)> = sqlx::query_as(
                "SELECT page_id FROM scraped_pages WHERE content_hash = $1 FOR UPDATE",
            )
            .bind(hash)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((page_id,)) = existing {
                sqlx::query(
                    r#"
                    UPDATE scraped_pages
                    SET fetched_at = $1, valid_until = $2, http_status = $3, reason = $4
                    WHERE page_id = $5
                    "#,
                )
                .bind(record.fetched_at)
                .bind(record.valid_until)
                .bind(record.http_status)
                .bind(record.reason.as_str())
                .bind(page_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                debug!(page_id, url = %record.url, "page deduplicated by content hash");
                return Ok(StoredPage::Deduplicated(page_id));
            }
        }

        // A fresh capture supersedes all older rows for this URL; a failed
        // fetch only replaces prior failures, keeping the last good
        // capture available for extraction.
        if record.content_hash.is_some() {
            sqlx::query("DELETE FROM scraped_pages WHERE venue_id = $1 AND url = $2")
                .bind(venue_id)
                .bind(&record.url)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "DELETE FROM scraped_pages WHERE venue_id = $1 AND url = $2 AND content_hash IS NULL",
            )
            .bind(venue_id)
            .bind(&record.url)
            .execute(&mut *tx)
            .await?;
        }

        let inserted = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO scraped_pages
                (venue_id, url, page_type, fetched_at, valid_until, http_status, content_type,
                 content_hash, cleaned_text, discovered_via, redirect_chain, reason,
                 size_bytes, total_ms, first_byte_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (content_hash) WHERE content_hash IS NOT NULL
            DO UPDATE SET fetched_at = EXCLUDED.fetched_at, valid_until = EXCLUDED.valid_until
            RETURNING page_id
            "#,
        )
        .bind(venue_id)
        .bind(&record.url)
        .bind(record.page_type.as_str())
        .bind(record.fetched_at)
        .bind(record.valid_until)
        .bind(record.http_status)
        .bind(&record.content_type)
        .bind(&record.content_hash)
        .bind(&record.cleaned_text)
        .bind(record.discovered_via.as_str())
        .bind(serde_json::to_value(&record.redirect_chain)?)
        .bind(record.reason.as_str())
        .bind(record.size_bytes)
        .bind(record.total_ms)
        .bind(record.first_byte_ms)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(StoredPage::Inserted(inserted.0))
    }

    /// Gate-passing pages for a venue still inside their TTL, newest
    /// first. Feeds extraction alongside the pages of the current crawl.
    pub async fn valid_pages_for_venue(&self, venue_id: &str) -> Result<Vec<PageRow>> {
        let rows = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT page_id, venue_id, url, page_type, fetched_at, valid_until, http_status,
                   content_type, content_hash, cleaned_text, reason
            FROM scraped_pages
            WHERE venue_id = $1
              AND reason = 'ok'
              AND cleaned_text IS NOT NULL
              AND (valid_until IS NULL OR valid_until > NOW())
            ORDER BY fetched_at DESC
            "#,
        )
        .bind(venue_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// All page URLs currently stored for a venue (used to verify source
    /// citations in ops tooling).
    pub async fn page_urls_for_venue(&self, venue_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT url FROM scraped_pages WHERE venue_id = $1")
                .bind(venue_id)
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }
}
