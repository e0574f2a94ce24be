use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::info;

use super::Store;

pub const REALTIME_PRIORITY: i32 = 10;
pub const BACKGROUND_MAX_PRIORITY: i32 = 7;
/// After this many reaps a stuck job fails for good.
const MAX_REAPS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Realtime,
    Background,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Realtime => "realtime",
            JobMode::Background => "background",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "realtime" => Some(JobMode::Realtime),
            "background" => Some(JobMode::Background),
            _ => None,
        }
    }

    pub fn default_priority(&self) -> i32 {
        match self {
            JobMode::Realtime => REALTIME_PRIORITY,
            JobMode::Background => 5,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CrawlJob {
    pub job_id: i64,
    pub venue_id: String,
    pub mode: String,
    pub priority: i32,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A job atomically moved to `running` by this worker, joined with the
/// venue's website.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedJob {
    pub job_id: i64,
    pub venue_id: String,
    pub mode: String,
    pub priority: i32,
    pub website: Option<String>,
}

#[derive(Debug, Clone)]
pub enum EnqueueResult {
    Created(i64),
    /// A pending job for the same venue+mode already existed.
    Existing(i64),
}

impl EnqueueResult {
    pub fn job_id(&self) -> i64 {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Existing(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueDepth {
    pub pending: i64,
    pub running: i64,
    pub success: i64,
    pub fail: i64,
}

impl Store {
    /// Enqueue a crawl job. An existing pending job for the same
    /// venue+mode is returned instead of creating a duplicate.
    pub async fn enqueue_job(
        &self,
        venue_id: &str,
        mode: JobMode,
        priority: i32,
    ) -> Result<EnqueueResult> {
        let priority = priority.clamp(0, REALTIME_PRIORITY);
        let existing: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT job_id FROM crawl_jobs
            WHERE venue_id = $1 AND mode = $2 AND state = 'pending'
            ORDER BY priority DESC, job_id ASC
            LIMIT 1
            "#,
        )
        .bind(venue_id)
        .bind(mode.as_str())
        .fetch_optional(self.pool())
        .await?;

        if let Some((job_id,)) = existing {
            return Ok(EnqueueResult::Existing(job_id));
        }

        let (job_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO crawl_jobs (venue_id, mode, priority, state)
            VALUES ($1, $2, $3, 'pending')
            RETURNING job_id
            "#,
        )
        .bind(venue_id)
        .bind(mode.as_str())
        .bind(priority)
        .fetch_one(self.pool())
        .await?;

        info!(job_id, venue_id, mode = mode.as_str(), priority, "job enqueued");
        Ok(EnqueueResult::Created(job_id))
    }

    /// Atomically claim up to `limit` pending jobs, honoring the per-host
    /// running cap. Concurrent claimants are safe: candidate rows are
    /// locked `FOR UPDATE SKIP LOCKED`, so no two workers ever observe the
    /// same job in `running`.
    pub async fn claim_jobs(&self, limit: i64, per_host_cap: i32) -> Result<Vec<ClaimedJob>> {
        let claims = sqlx::query_as::<_, ClaimedJob>(
            r#"
            UPDATE crawl_jobs cj
            SET state = 'running', started_at = NOW(), error = NULL
            FROM venues v
            WHERE v.venue_id = cj.venue_id
              AND cj.job_id IN (
                SELECT c.job_id
                FROM crawl_jobs c
                JOIN venues cv ON cv.venue_id = c.venue_id
                LEFT JOIN (
                    SELECT lower(split_part(split_part(
                               regexp_replace(rv.website, '^https?://', ''), '/', 1), ':', 1)) AS host,
                           COUNT(*) AS running_now
                    FROM crawl_jobs rj
                    JOIN venues rv ON rv.venue_id = rj.venue_id
                    WHERE rj.state = 'running' AND rv.website IS NOT NULL
                    GROUP BY 1
                ) running ON running.host = lower(split_part(split_part(
                               regexp_replace(cv.website, '^https?://', ''), '/', 1), ':', 1))
                WHERE c.state = 'pending'
                  AND (cv.website IS NULL OR COALESCE(running.running_now, 0) < $1)
                ORDER BY c.priority DESC, c.job_id ASC
                LIMIT $2
                FOR UPDATE OF c SKIP LOCKED
              )
            RETURNING cj.job_id, cj.venue_id, cj.mode, cj.priority, v.website
            "#,
        )
        .bind(per_host_cap)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(claims)
    }

    pub async fn finish_job_success(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET state = 'success', finished_at = NOW(), error = NULL
            WHERE job_id = $1 AND state = 'running'
            "#,
        )
        .bind(job_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn finish_job_fail(&self, job_id: i64, error: &str) -> Result<()> {
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
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<CrawlJob>> {
        let job = sqlx::query_as::<_, CrawlJob>(
            r#"
            SELECT job_id, venue_id, mode, priority, state, started_at, finished_at, error
            FROM crawl_jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(job)
    }

    pub async fn has_active_job(&self, venue_id: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM crawl_jobs
                WHERE venue_id = $1 AND state IN ('pending', 'running')
            )
            "#,
        )
        .bind(venue_id)
        .fetch_one(self.pool())
        .await?;
        Ok(exists)
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM crawl_jobs GROUP BY state")
                .fetch_all(self.pool())
                .await?;
        let mut depth = QueueDepth::default();
        for (state, n) in rows {
            match state.as_str() {
                "pending" => depth.pending = n,
                "running" => depth.running = n,
                "success" => depth.success = n,
                "fail" => depth.fail = n,
                _ => {}
            }
        }
        Ok(depth)
    }

    /// Return jobs stuck in `running` past `threshold_ms` to `pending`;
    /// jobs already reaped [`MAX_REAPS`] times fail with `reset_stuck`.
    /// Returns (requeued, failed).
    pub async fn reap_stuck_jobs(&self, threshold_ms: i64) -> Result<(u64, u64)> {
        let failed = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET state = 'fail', finished_at = NOW(), error = 'reset_stuck'
            WHERE state = 'running'
              AND started_at < NOW() - ($1 || ' milliseconds')::interval
              AND reap_count >= $2
            "#,
        )
        .bind(threshold_ms.to_string())
        .bind(MAX_REAPS)
        .execute(self.pool())
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET state = 'pending', started_at = NULL, reap_count = reap_count + 1
            WHERE state = 'running'
              AND started_at < NOW() - ($1 || ' milliseconds')::interval
            "#,
        )
        .bind(threshold_ms.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if requeued > 0 || failed > 0 {
            info!(requeued, failed, "reaped stuck jobs");
        }
        Ok((requeued, failed))
    }

    /// Recent terminal-job success rate and mean duration, for queue
    /// health reporting.
    pub async fn recent_job_stats(&self) -> Result<(i64, i64, f64)> {
        let row: (i64, i64, Option<f64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE state = 'success'),
                   AVG(EXTRACT(EPOCH FROM (finished_at - started_at)) * 1000.0)
            FROM crawl_jobs
            WHERE finished_at > NOW() - INTERVAL '1 hour'
              AND state IN ('success', 'fail')
            "#,
        )
        .fetch_one(self.pool())
        .await?;
        Ok((row.0, row.1, row.2.unwrap_or(0.0)))
    }
}

/// Priority for a background job derived from venue popularity. Null
/// popularity ranks lowest; the result never reaches realtime priority.
pub fn background_priority(popularity: Option<f32>) -> i32 {
    let p = popularity.unwrap_or(0.0).clamp(0.0, 1.0);
    1 + (p * (BACKGROUND_MAX_PRIORITY - 1) as f32).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_priority_never_reaches_realtime() {
        assert_eq!(background_priority(None), 1);
        assert_eq!(background_priority(Some(0.0)), 1);
        assert_eq!(background_priority(Some(1.0)), BACKGROUND_MAX_PRIORITY);
        assert!(background_priority(Some(1.0)) < REALTIME_PRIORITY);
    }

    #[test]
    fn mode_round_trip() {
        assert_eq!(JobMode::parse("realtime"), Some(JobMode::Realtime));
        assert_eq!(JobMode::parse("background"), Some(JobMode::Background));
        assert_eq!(JobMode::parse("other"), None);
        assert!(JobMode::Realtime.default_priority() > JobMode::Background.default_priority());
    }
}
