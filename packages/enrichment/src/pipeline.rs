//! Site-level crawl orchestration.
//!
//! For one venue: homepage fetch → target discovery → up to three parallel
//! target fetches, all inside one hard wall-clock budget and all admitted
//! through the rate gate. Pages are quality-gated and stamped with
//! per-type TTLs; the outcome carries the telemetry recorded on the job.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};
use url::Url;

use crate::deadline::Deadline;
use crate::domain::registered_domain;
use crate::downloader::{Fetcher, MIN_FETCH_BUDGET};
use crate::error::PageReason;
use crate::gate::RateGate;
use crate::links::{discover_targets, CandidateLink};
use crate::page::{CrawlOutcome, CrawlPage, DiscoveryMethod, PageFetch, PageRecord, PageType};
use crate::clean;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub budget: Duration,
    pub max_targets: usize,
    /// Total attempts per URL for transient failures (1 + retries).
    pub max_attempts: u32,
    pub ttl_hours_days: i64,
    pub ttl_menu_contact_fees_days: i64,
    pub ttl_desc_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(5000),
            max_targets: 3,
            max_attempts: 3,
            ttl_hours_days: 3,
            ttl_menu_contact_fees_days: 14,
            ttl_desc_days: 30,
        }
    }
}

pub struct CrawlPipeline {
    fetcher: Arc<dyn Fetcher>,
    gate: Arc<RateGate>,
    config: PipelineConfig,
}

impl CrawlPipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>, gate: Arc<RateGate>, config: PipelineConfig) -> Self {
        Self {
            fetcher,
            gate,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Crawl one venue's site within the configured budget.
    pub async fn crawl_site(&self, base_url: &str) -> CrawlOutcome {
        let deadline = Deadline::after(self.config.budget);
        let started_at = Utc::now();
        let mut pages: Vec<CrawlPage> = Vec::new();

        let homepage = self.fetch_gated(base_url, &deadline).await;
        let home_final = homepage.final_url.clone();
        let home_html = homepage.html.clone();
        let home_page = self.gated_page(homepage, PageType::Homepage, DiscoveryMethod::DirectUrl);
        let home_reason = home_page.record.reason;
        let home_usable = home_page.record.passed_gate();
        pages.push(home_page);

        // Network-level homepage failures end the crawl; there is nothing
        // to discover targets from.
        let hard_stop = matches!(
            home_reason,
            PageReason::RobotsDisallowed
                | PageReason::NetworkTimeout
                | PageReason::DnsFailure
                | PageReason::TlsError
                | PageReason::NetworkError
                | PageReason::TimeBudgetExceeded
        );

        if !hard_stop {
            let targets = match (&home_html, Url::parse(&home_final)) {
                (Some(html), Ok(final_url)) if home_usable => {
                    discover_targets(html, &final_url, self.config.max_targets)
                }
                _ => Vec::new(),
            };
            debug!(base_url, targets = targets.len(), "target discovery done");

            pages.extend(self.fetch_targets(targets, &deadline).await);
        }

        let ended_at = Utc::now();
        let duration_ms = deadline.elapsed().as_millis() as i64;

        let fetched_count = pages.iter().filter(|p| p.record.http_status == 200).count();
        let aborted_count = pages
            .iter()
            .filter(|p| {
                matches!(
                    p.record.reason,
                    PageReason::TimeBudgetExceeded | PageReason::NetworkTimeout
                )
            })
            .count();
        let mut errors_by_class: BTreeMap<String, usize> = BTreeMap::new();
        for page in &pages {
            if !page.record.reason.is_ok() {
                *errors_by_class
                    .entry(page.record.reason.as_str().to_string())
                    .or_default() += 1;
            }
        }

        let outcome = CrawlOutcome {
            base_url: base_url.to_string(),
            started_at,
            ended_at,
            duration_ms,
            fetched_count,
            aborted_count,
            errors_by_class,
            pages,
        };
        info!(
            base_url,
            duration_ms,
            fetched = outcome.fetched_count,
            aborted = outcome.aborted_count,
            partial_success = outcome.homepage_ok(),
            "crawl finished"
        );
        outcome
    }

    /// Fetch the discovered targets in parallel (at most three are ever
    /// discovered), each gated and deadline-checked before issue.
    async fn fetch_targets(
        &self,
        targets: Vec<CandidateLink>,
        deadline: &Deadline,
    ) -> Vec<CrawlPage> {
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let fetcher = self.fetcher.clone();
            let gate = self.gate.clone();
            let deadline = *deadline;
            let max_attempts = self.config.max_attempts;
            handles.push(tokio::spawn(async move {
                let fetch = if deadline.allows(MIN_FETCH_BUDGET) {
                    fetch_gated_inner(&*fetcher, &gate, &target.url, &deadline, max_attempts).await
                } else {
                    PageFetch::failed(&target.url, PageReason::TimeBudgetExceeded)
                };
                (target, fetch)
            }));
        }

        let mut pages = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok((target, fetch)) = handle.await {
                pages.push(self.gated_page(fetch, target.page_type, DiscoveryMethod::Heuristic));
            }
        }
        pages
    }

    async fn fetch_gated(&self, url: &str, deadline: &Deadline) -> PageFetch {
        fetch_gated_inner(
            &*self.fetcher,
            &self.gate,
            url,
            deadline,
            self.config.max_attempts,
        )
        .await
    }

    /// Apply the quality gate and TTL, producing the persistable record.
    fn gated_page(
        &self,
        fetch: PageFetch,
        page_type: PageType,
        discovered_via: DiscoveryMethod,
    ) -> CrawlPage {
        let mut reason = fetch.reason;
        let mut cleaned_text = None;
        let mut html = None;

        if reason.is_ok() {
            let text = fetch.cleaned_text.unwrap_or_default();
            if clean::passes_quality_gate(&text) {
                cleaned_text = Some(text);
                html = fetch.html;
            } else {
                reason = PageReason::ThinContent;
            }
        }

        let valid_until = if reason.is_ok() {
            Some(Utc::now() + chrono::Duration::days(self.ttl_days_for(page_type)))
        } else {
            None
        };

        CrawlPage {
            record: PageRecord {
                url: fetch.final_url,
                page_type,
                fetched_at: fetch.fetched_at,
                valid_until,
                http_status: fetch.status as i32,
                content_type: fetch.content_type,
                content_hash: fetch.content_hash,
                cleaned_text,
                discovered_via,
                redirect_chain: fetch.redirect_chain,
                reason,
                size_bytes: fetch.size_bytes as i64,
                total_ms: fetch.total_ms,
                first_byte_ms: fetch.first_byte_ms,
            },
            html,
        }
    }

    fn ttl_days_for(&self, page_type: PageType) -> i64 {
        match page_type {
            PageType::Hours => self.config.ttl_hours_days,
            PageType::Menu | PageType::Contact | PageType::Fees => {
                self.config.ttl_menu_contact_fees_days
            }
            PageType::Homepage | PageType::About | PageType::Other => self.config.ttl_desc_days,
        }
    }
}

/// One gated fetch with bounded retries for transient failures.
async fn fetch_gated_inner(
    fetcher: &dyn Fetcher,
    gate: &RateGate,
    url: &str,
    deadline: &Deadline,
    max_attempts: u32,
) -> PageFetch {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(registered_domain))
        .unwrap_or_default();

    let mut attempts = 0;
    loop {
        attempts += 1;

        let permit =
            match tokio::time::timeout(deadline.remaining(), gate.acquire(&host)).await {
                Ok(permit) => permit,
                Err(_) => return PageFetch::failed(url, PageReason::TimeBudgetExceeded),
            };

        let fetch = fetcher.fetch(url, deadline).await;
        drop(permit);

        if fetch.reason.is_ok() {
            gate.note_success(&host);
            return fetch;
        }
        if fetch.reason.is_transient() {
            gate.note_failure(&host);
            if attempts < max_attempts && !deadline.expired() {
                debug!(url, attempt = attempts, reason = %fetch.reason, "retrying transient failure");
                continue;
            }
        }
        return fetch;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::gate::{RateGate, RateGateConfig};
    use crate::testing::MockFetcher;

    use super::*;

    fn gate() -> Arc<RateGate> {
        Arc::new(RateGate::new(RateGateConfig::default()))
    }

    fn pipeline(fetcher: MockFetcher) -> CrawlPipeline {
        CrawlPipeline::new(Arc::new(fetcher), gate(), PipelineConfig::default())
    }

    fn long_text(seed: &str) -> String {
        format!("{seed} ").repeat(60)
    }

    fn homepage_html() -> String {
        format!(
            r#"<html><body>
            <nav>
              <a href="/hours">Opening hours</a>
              <a href="/menu">Menu</a>
              <a href="/contact">Contact us</a>
            </nav>
            <p>{}</p>
            </body></html>"#,
            long_text("Seasonal cooking in a converted boathouse on the quay.")
        )
    }

    #[tokio::test]
    async fn happy_path_fetches_homepage_and_targets() {
        let fetcher = MockFetcher::new()
            .with_html("https://v.example/", &homepage_html())
            .with_html(
                "https://v.example/hours",
                &format!("<html><body><p>Mon-Fri 9:00-17:00 {}</p></body></html>", long_text("open")),
            )
            .with_html(
                "https://v.example/menu",
                &format!("<html><body><p>{}</p></body></html>", long_text("Pasta £12.00")),
            )
            .with_html(
                "https://v.example/contact",
                &format!("<html><body><p>{}</p></body></html>", long_text("Call +44 20 1234 5678")),
            );
        let outcome = pipeline(fetcher).crawl_site("https://v.example/").await;

        assert!(outcome.homepage_ok());
        assert_eq!(outcome.pages.len(), 4);
        assert_eq!(outcome.fetched_count, 4);
        assert_eq!(outcome.aborted_count, 0);

        let types: Vec<_> = outcome.pages.iter().map(|p| p.record.page_type).collect();
        assert_eq!(
            types,
            vec![PageType::Homepage, PageType::Hours, PageType::Menu, PageType::Contact]
        );
        for page in &outcome.pages {
            assert!(page.record.valid_until.is_some());
        }
    }

    #[tokio::test]
    async fn robots_disallowed_homepage_aborts_crawl() {
        let fetcher = MockFetcher::new()
            .with_failure("https://v.example/", PageReason::RobotsDisallowed);
        let outcome = pipeline(fetcher).crawl_site("https://v.example/").await;

        assert_eq!(outcome.pages.len(), 1);
        assert!(!outcome.homepage_ok());
        assert_eq!(outcome.failure_reason(), Some(PageReason::RobotsDisallowed));
    }

    #[tokio::test]
    async fn thin_homepage_fails_gate_but_is_recorded() {
        let fetcher =
            MockFetcher::new().with_html("https://v.example/", "<html><body>Soon</body></html>");
        let outcome = pipeline(fetcher).crawl_site("https://v.example/").await;

        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.pages[0].record.reason, PageReason::ThinContent);
        assert!(outcome.pages[0].record.valid_until.is_none());
        assert!(!outcome.homepage_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_homepage_exhausts_budget_for_targets() {
        let fetcher = MockFetcher::new()
            .with_html("https://v.example/", &homepage_html())
            .with_delay("https://v.example/", Duration::from_millis(4900))
            .with_html("https://v.example/hours", &long_text("hours"))
            .with_delay("https://v.example/hours", Duration::from_millis(1200))
            .with_html("https://v.example/menu", &long_text("menu"))
            .with_delay("https://v.example/menu", Duration::from_millis(1200))
            .with_html("https://v.example/contact", &long_text("contact"))
            .with_delay("https://v.example/contact", Duration::from_millis(1200));

        let outcome = pipeline(fetcher).crawl_site("https://v.example/").await;

        assert!(outcome.homepage_ok(), "homepage landed inside the budget");
        assert_eq!(outcome.pages.len(), 4);
        for page in &outcome.pages[1..] {
            assert_eq!(page.record.reason, PageReason::TimeBudgetExceeded);
        }
        assert_eq!(outcome.aborted_count, 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let fetcher = MockFetcher::new().with_flaky(
            "https://v.example/",
            2,
            &format!("<html><body><p>{}</p></body></html>", long_text("welcome")),
        );
        let outcome = pipeline(fetcher).crawl_site("https://v.example/").await;

        assert!(outcome.homepage_ok());
        assert_eq!(outcome.pages[0].record.reason, PageReason::Ok);
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let fetcher = MockFetcher::new()
            .with_html("https://v.example/", &homepage_html())
            .with_failure("https://v.example/menu", PageReason::Non200Status);
        let pipeline = pipeline(fetcher);
        let outcome = pipeline.crawl_site("https://v.example/").await;

        let menu = outcome
            .pages
            .iter()
            .find(|p| p.record.page_type == PageType::Menu)
            .unwrap();
        assert_eq!(menu.record.reason, PageReason::Non200Status);
        // Partial success still holds on the homepage.
        assert!(outcome.homepage_ok());
    }
}
