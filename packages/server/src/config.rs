use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Local,
    Staging,
    Prod,
}

impl AppEnv {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "local" => Ok(AppEnv::Local),
            "staging" => Ok(AppEnv::Staging),
            "prod" => Ok(AppEnv::Prod),
            other => anyhow::bail!("APP_ENV must be local|staging|prod, got {other}"),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub app_env: AppEnv,
    pub port: u16,

    // Query endpoint
    pub query_default_radius_m: i32,
    pub query_max_results: i64,

    // Crawling
    pub crawl_global_concurrency: usize,
    pub crawl_per_host_concurrency: usize,
    pub crawl_budget_ms: u64,
    pub crawl_page_size_limit_bytes: usize,
    /// Number of peer processes sharing the global concurrency budget.
    pub crawl_process_share: usize,

    // Freshness windows (days)
    pub fresh_hours_days: i64,
    pub fresh_menu_contact_price_days: i64,
    pub fresh_desc_features_days: i64,

    // Worker
    pub worker_count: usize,
    pub worker_batch_size: i64,
    pub worker_sleep_seconds: u64,

    // Scheduler
    pub scheduler_sleep_seconds: u64,
    pub scheduler_batch_size: i64,
    pub scheduler_top_percentile: f64,

    // Embeddings (optional backend; the query path works without it)
    pub embedding_api_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
}

impl Config {
    /// Load configuration from environment variables (and `.env` in
    /// development).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            app_env: AppEnv::parse(&env::var("APP_ENV").unwrap_or_else(|_| "local".to_string()))?,
            port: parse_var("PORT", 8080)?,
            query_default_radius_m: parse_var("QUERY_DEFAULT_RADIUS_M", 1500)?,
            query_max_results: parse_var("QUERY_MAX_RESULTS", 30)?,
            crawl_global_concurrency: parse_var("CRAWL_GLOBAL_CONCURRENCY", 32)?,
            crawl_per_host_concurrency: parse_var("CRAWL_PER_HOST_CONCURRENCY", 2)?,
            crawl_budget_ms: parse_var("CRAWL_BUDGET_MS", 5000)?,
            crawl_page_size_limit_bytes: parse_var("CRAWL_PAGE_SIZE_LIMIT_BYTES", 2_000_000)?,
            crawl_process_share: parse_var("CRAWL_PROCESS_SHARE", 1)?,
            fresh_hours_days: parse_var("FRESH_HOURS_DAYS", 3)?,
            fresh_menu_contact_price_days: parse_var("FRESH_MENU_CONTACT_PRICE_DAYS", 14)?,
            fresh_desc_features_days: parse_var("FRESH_DESC_FEATURES_DAYS", 30)?,
            worker_count: parse_var("WORKER_COUNT", 1)?,
            worker_batch_size: parse_var("WORKER_BATCH_SIZE", 8)?,
            worker_sleep_seconds: parse_var("WORKER_SLEEP_SECONDS", 1)?,
            scheduler_sleep_seconds: parse_var("SCHEDULER_SLEEP_SECONDS", 300)?,
            scheduler_batch_size: parse_var("SCHEDULER_BATCH_SIZE", 50)?,
            scheduler_top_percentile: parse_var("SCHEDULER_TOP_PERCENTILE", 0.9)?,
            embedding_api_url: env::var("EMBEDDING_API_URL").ok().filter(|s| !s.is_empty()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok().filter(|s| !s.is_empty()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
        })
    }

    pub fn crawl_budget(&self) -> Duration {
        Duration::from_millis(self.crawl_budget_ms)
    }

    /// This process's slice of the global fetch budget. Multi-process
    /// deployments honor the fleet cap proportionally.
    pub fn effective_global_concurrency(&self) -> usize {
        (self.crawl_global_concurrency / self.crawl_process_share.max(1)).max(1)
    }

    /// Jobs stuck in `running` longer than this are reclaimable.
    pub fn stuck_job_threshold(&self) -> Duration {
        self.crawl_budget() * 2
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a valid value, got {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_concurrency_divided_by_process_share() {
        let mut config = test_config();
        config.crawl_global_concurrency = 32;
        config.crawl_process_share = 4;
        assert_eq!(config.effective_global_concurrency(), 8);

        config.crawl_process_share = 0;
        assert_eq!(config.effective_global_concurrency(), 32);
    }

    #[test]
    fn stuck_threshold_is_twice_the_budget() {
        let config = test_config();
        assert_eq!(config.stuck_job_threshold(), Duration::from_millis(10_000));
    }

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            app_env: AppEnv::Local,
            port: 8080,
            query_default_radius_m: 1500,
            query_max_results: 30,
            crawl_global_concurrency: 32,
            crawl_per_host_concurrency: 2,
            crawl_budget_ms: 5000,
            crawl_page_size_limit_bytes: 2_000_000,
            crawl_process_share: 1,
            fresh_hours_days: 3,
            fresh_menu_contact_price_days: 14,
            fresh_desc_features_days: 30,
            worker_count: 1,
            worker_batch_size: 8,
            worker_sleep_seconds: 1,
            scheduler_sleep_seconds: 300,
            scheduler_batch_size: 50,
            scheduler_top_percentile: 0.9,
            embedding_api_url: None,
            embedding_api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}
