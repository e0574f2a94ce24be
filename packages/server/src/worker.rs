//! Worker pool: claims crawl jobs, runs the crawl → extract → unify
//! pipeline, and commits results.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use enrichment::{derive_candidates, extract_facts, unify, CrawlPage, CrawlPipeline, PageReason};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::store::{ClaimedJob, Store};

/// Website recovery must resolve inside this slice of the job budget.
const RECOVERY_BUDGET: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct WorkerStats {
    processed: u64,
    succeeded: u64,
    failed: u64,
    total_crawl_ms: u64,
}

impl WorkerStats {
    fn record(&mut self, success: bool, crawl_ms: u64) {
        self.processed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.total_crawl_ms += crawl_ms;
    }

    fn log(&self, worker: usize) {
        let avg_ms = if self.processed > 0 {
            self.total_crawl_ms / self.processed
        } else {
            0
        };
        info!(
            worker,
            processed = self.processed,
            succeeded = self.succeeded,
            failed = self.failed,
            avg_crawl_ms = avg_ms,
            "worker stats"
        );
    }
}

pub struct WorkerPool {
    store: Store,
    pipeline: Arc<CrawlPipeline>,
    worker_count: usize,
    batch_size: i64,
    per_host_cap: i32,
    idle_sleep: Duration,
}

impl WorkerPool {
    pub fn new(store: Store, pipeline: Arc<CrawlPipeline>, config: &Config) -> Self {
        Self {
            store,
            pipeline,
            worker_count: config.worker_count.max(1),
            batch_size: config.worker_batch_size,
            per_host_cap: config.crawl_per_host_concurrency as i32,
            idle_sleep: Duration::from_secs(config.worker_sleep_seconds),
        }
    }

    /// Run all worker loops until the shutdown token fires. In-flight jobs
    /// finish (bounded by the crawl budget); claimed-but-unstarted jobs
    /// fail with `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(workers = self.worker_count, batch_size = self.batch_size, "worker pool starting");

        let mut handles = Vec::with_capacity(self.worker_count);
        for worker in 0..self.worker_count {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker, shutdown).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
        Ok(())
    }

    async fn worker_loop(&self, worker: usize, shutdown: CancellationToken) {
        let mut stats = WorkerStats::default();

        while !shutdown.is_cancelled() {
            let claims = match self.store.claim_jobs(self.batch_size, self.per_host_cap).await {
                Ok(claims) => claims,
                Err(e) => {
                    error!(worker, error = %e, "failed to claim jobs");
                    tokio::time::sleep(self.idle_sleep).await;
                    continue;
                }
            };

            if claims.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_sleep) => {}
                }
                continue;
            }

            debug!(worker, count = claims.len(), "claimed jobs");

            // The same venue claimed twice in one batch runs once; the
            // duplicate completes as a no-op success.
            let mut seen_venues: HashSet<String> = HashSet::new();
            let mut to_run = Vec::with_capacity(claims.len());
            for job in claims {
                if shutdown.is_cancelled() {
                    if let Err(e) = self
                        .store
                        .finish_job_fail(job.job_id, PageReason::Shutdown.as_str())
                        .await
                    {
                        error!(job_id = job.job_id, error = %e, "failed to mark job for shutdown");
                    }
                } else if !seen_venues.insert(job.venue_id.clone()) {
                    debug!(job_id = job.job_id, venue_id = %job.venue_id, "duplicate venue in batch");
                    if let Err(e) = self.store.finish_job_success(job.job_id).await {
                        error!(job_id = job.job_id, error = %e, "failed to complete duplicate job");
                    }
                } else {
                    to_run.push(job);
                }
            }

            // Jobs run concurrently: `started_at` was stamped at claim, so
            // serial processing would blow each job's wall-clock bound.
            // Fetch parallelism stays bounded by the rate gate.
            let results = futures::future::join_all(to_run.iter().map(|job| async {
                let started = std::time::Instant::now();
                let success = match self.process_job(job).await {
                    Ok(success) => success,
                    Err(e) => {
                        warn!(job_id = job.job_id, venue_id = %job.venue_id, error = %e, "job failed");
                        let msg: String = e.to_string().chars().take(500).collect();
                        if let Err(e) = self.store.finish_job_fail(job.job_id, &msg).await {
                            error!(job_id = job.job_id, error = %e, "failed to mark job as failed");
                        }
                        false
                    }
                };
                (success, started.elapsed().as_millis() as u64)
            }))
            .await;

            for (success, elapsed_ms) in results {
                stats.record(success, elapsed_ms);
            }
            if stats.processed % 10 < to_run.len() as u64 {
                stats.log(worker);
            }
        }

        stats.log(worker);
        info!(worker, "worker loop stopped");
    }

    /// Run one claimed job end to end. Returns Ok(true) on job success,
    /// Ok(false) when the job was completed as failed.
    async fn process_job(&self, job: &ClaimedJob) -> Result<bool> {
        info!(job_id = job.job_id, venue_id = %job.venue_id, mode = %job.mode, "processing job");

        let website = match &job.website {
            Some(website) if !website.is_empty() => website.clone(),
            _ => match self.recover_website(&job.venue_id).await? {
                Some(website) => website,
                None => {
                    self.store
                        .commit_job_result(job.job_id, &job.venue_id, None, Some(PageReason::NoWebsite.as_str()))
                        .await?;
                    return Ok(false);
                }
            },
        };

        let outcome = self.pipeline.crawl_site(&website).await;

        for page in &outcome.pages {
            // Robots-disallowed pages were never fetched; storing them
            // would record content we were told not to take.
            if page.record.reason == PageReason::RobotsDisallowed {
                continue;
            }
            self.store.upsert_page(&job.venue_id, &page.record).await?;
        }

        if !outcome.homepage_ok() {
            let reason = outcome
                .failure_reason()
                .map(|r| r.as_str())
                .unwrap_or("no_page_passed_gate");
            self.store
                .commit_job_result(job.job_id, &job.venue_id, None, Some(reason))
                .await?;
            return Ok(false);
        }

        // Extraction runs over this crawl's pages plus stored pages still
        // inside their TTL (minus URLs just re-fetched).
        let mut pages: Vec<CrawlPage> = outcome.pages.clone();
        let crawled_urls: HashSet<String> =
            pages.iter().map(|p| p.record.url.clone()).collect();
        for row in self.store.valid_pages_for_venue(&job.venue_id).await? {
            if !crawled_urls.contains(&row.url) {
                pages.push(CrawlPage {
                    record: row.into_record(),
                    html: None,
                });
            }
        }

        let candidates = extract_facts(&pages);
        let update = unify(&candidates);
        info!(
            job_id = job.job_id,
            venue_id = %job.venue_id,
            fields = ?update.updated_fields(),
            fetched = outcome.fetched_count,
            aborted = outcome.aborted_count,
            duration_ms = outcome.duration_ms,
            "crawl extracted"
        );

        self.store
            .commit_job_result(job.job_id, &job.venue_id, Some(&update), None)
            .await?;
        Ok(true)
    }

    /// Infer a website for a venue that has none, persisting the candidate
    /// audit trail. Bounded by [`RECOVERY_BUDGET`].
    async fn recover_website(&self, venue_id: &str) -> Result<Option<String>> {
        let recovered = tokio::time::timeout(RECOVERY_BUDGET, async {
            let Some(venue) = self.store.get_venue(venue_id).await? else {
                return Ok::<Option<String>, anyhow::Error>(None);
            };

            // Social profiles already captured in enrichment can hint at a
            // homepage.
            let socials: Vec<String> = self
                .store
                .get_enrichment(venue_id)
                .await?
                .and_then(|e| e.contact)
                .and_then(|c| c.get("social").cloned())
                .and_then(|s| serde_json::from_value(s).ok())
                .unwrap_or_default();

            let candidates = derive_candidates(venue.email.as_deref(), &socials);
            if candidates.is_empty() {
                return Ok(None);
            }
            let chosen = candidates[0].url.clone();
            self.store
                .record_recovery(venue_id, &candidates, Some(&chosen))
                .await?;
            Ok(Some(chosen))
        })
        .await;

        match recovered {
            Ok(result) => result,
            Err(_) => {
                warn!(venue_id, "website recovery timed out");
                Ok(None)
            }
        }
    }
}
