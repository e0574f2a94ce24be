//! Background scheduler: periodically reaps stuck jobs and enqueues
//! background crawls for venues with stale or missing enrichment.
//!
//! Per-area and per-category quotas stop a single neighbourhood or venue
//! kind from monopolizing a cycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::freshness::{categorize, CategoryGroup};
use crate::store::{background_priority, JobMode, Store};

/// At most this share of one cycle's batch may come from a single area
/// cell or category group.
const QUOTA_SHARE: f64 = 0.4;
/// Area cell size in degrees (~5.5 km of latitude).
const AREA_CELL_DEG: f64 = 0.05;

pub struct Scheduler {
    store: Store,
    batch_size: i64,
    top_percentile: f64,
    sleep: Duration,
    stuck_threshold_ms: i64,
    windows: (i64, i64, i64),
}

#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub candidates: usize,
    pub enqueued: usize,
    pub skipped_by_quota: usize,
}

impl Scheduler {
    pub fn new(store: Store, config: &Config) -> Self {
        Self {
            store,
            batch_size: config.scheduler_batch_size,
            top_percentile: config.scheduler_top_percentile,
            sleep: Duration::from_secs(config.scheduler_sleep_seconds),
            stuck_threshold_ms: config.stuck_job_threshold().as_millis() as i64,
            windows: (
                config.fresh_hours_days,
                config.fresh_menu_contact_price_days,
                config.fresh_desc_features_days,
            ),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            batch_size = self.batch_size,
            sleep_s = self.sleep.as_secs(),
            "scheduler starting"
        );

        while !shutdown.is_cancelled() {
            match self.run_cycle().await {
                Ok(outcome) => info!(
                    candidates = outcome.candidates,
                    enqueued = outcome.enqueued,
                    skipped_by_quota = outcome.skipped_by_quota,
                    "scheduler cycle complete"
                ),
                Err(e) => error!(error = %e, "scheduler cycle failed"),
            }

            if let Err(e) = self.log_queue_health().await {
                warn!(error = %e, "queue health check failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.sleep) => {}
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.store.reap_stuck_jobs(self.stuck_threshold_ms).await?;

        let popularity_floor = self
            .store
            .popularity_percentile(self.top_percentile)
            .await
            .unwrap_or(None);

        let (hours, menu, desc) = self.windows;
        let stale = self
            .store
            .select_stale_venues(hours, menu, desc, popularity_floor, self.batch_size * 2)
            .await?;

        let mut outcome = CycleOutcome {
            candidates: stale.len(),
            ..Default::default()
        };
        let quota = ((self.batch_size as f64) * QUOTA_SHARE).ceil() as usize;
        let mut per_area: HashMap<(i64, i64), usize> = HashMap::new();
        let mut per_category: HashMap<CategoryGroup, usize> = HashMap::new();

        for venue in stale {
            if outcome.enqueued >= self.batch_size as usize {
                break;
            }

            let area = area_cell(venue.latitude, venue.longitude);
            let category = categorize(venue.category_name.as_deref());
            let area_count = per_area.entry(area).or_default();
            let category_count = per_category.entry(category).or_default();
            if *area_count >= quota || *category_count >= quota {
                outcome.skipped_by_quota += 1;
                continue;
            }

            let priority = background_priority(venue.popularity);
            self.store
                .enqueue_job(&venue.venue_id, JobMode::Background, priority)
                .await?;
            *area_count += 1;
            *category_count += 1;
            outcome.enqueued += 1;
        }

        Ok(outcome)
    }

    async fn log_queue_health(&self) -> Result<()> {
        let depth = self.store.queue_depth().await?;
        let (total, succeeded, avg_ms) = self.store.recent_job_stats().await?;
        let success_rate = if total > 0 {
            succeeded as f64 / total as f64
        } else {
            1.0
        };

        info!(
            pending = depth.pending,
            running = depth.running,
            recent_jobs = total,
            recent_success_rate = format!("{success_rate:.2}"),
            recent_avg_ms = format!("{avg_ms:.0}"),
            "queue health"
        );
        if depth.pending > 100 {
            warn!(pending = depth.pending, "high queue depth, consider more workers");
        }
        if total > 10 && success_rate < 0.8 {
            warn!(success_rate = format!("{success_rate:.2}"), "low recent success rate");
        }
        Ok(())
    }
}

fn area_cell(lat: f64, lon: f64) -> (i64, i64) {
    ((lat / AREA_CELL_DEG).floor() as i64, (lon / AREA_CELL_DEG).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_cells_bucket_nearby_points_together() {
        let a = area_cell(51.5010, -0.1220);
        let b = area_cell(51.5015, -0.1230);
        let far = area_cell(52.2000, 0.1000);
        assert_eq!(a, b);
        assert_ne!(a, far);
    }

    #[test]
    fn negative_coordinates_floor_consistently() {
        let a = area_cell(-33.8688, 151.2093);
        let b = area_cell(-33.8690, 151.2095);
        assert_eq!(a, b);
    }
}
