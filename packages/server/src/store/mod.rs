//! PostgreSQL persistence: venues, scraped pages, enrichment, crawl jobs,
//! recovery candidates, embeddings.
//!
//! The [`Store`] wraps one shared `PgPool` and is cloned freely into
//! services. Queries are runtime-checked `sqlx` with `FromRow` row types.

mod embeddings;
mod enrichment_rows;
mod jobs;
mod pages;
mod recovery;
mod venues;

pub use embeddings::{SimilarityHit, EMBEDDING_DIM};
pub use enrichment_rows::EnrichmentRow;
pub use jobs::{
    background_priority, ClaimedJob, CrawlJob, EnqueueResult, JobMode, QueueDepth,
    REALTIME_PRIORITY,
};
pub use pages::{PageRow, StoredPage};
pub use venues::{GeoHit, Venue};

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Liveness probe.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
