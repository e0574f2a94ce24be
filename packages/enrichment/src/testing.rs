//! Mock fetcher for exercising the pipeline without a network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::clean;
use crate::deadline::Deadline;
use crate::downloader::Fetcher;
use crate::error::PageReason;
use crate::page::{content_hash, PageFetch};

#[derive(Default)]
pub struct MockFetcher {
    pages: Mutex<HashMap<String, MockPage>>,
    calls: Mutex<Vec<String>>,
}

struct MockPage {
    html: Option<String>,
    reason: PageReason,
    delay: Duration,
    /// Fail this many times before serving the page.
    failures_left: u32,
    failure_reason: PageReason,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for `url` with a 200/ok outcome.
    pub fn with_html(self, url: &str, html: &str) -> Self {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            MockPage {
                html: Some(html.to_string()),
                reason: PageReason::Ok,
                delay: Duration::ZERO,
                failures_left: 0,
                failure_reason: PageReason::NetworkError,
            },
        );
        self
    }

    /// Always fail `url` with `reason`.
    pub fn with_failure(self, url: &str, reason: PageReason) -> Self {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            MockPage {
                html: None,
                reason,
                delay: Duration::ZERO,
                failures_left: 0,
                failure_reason: reason,
            },
        );
        self
    }

    /// Fail `url` `failures` times with a transient reason, then serve
    /// `html`.
    pub fn with_flaky(self, url: &str, failures: u32, html: &str) -> Self {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            MockPage {
                html: Some(html.to_string()),
                reason: PageReason::Ok,
                delay: Duration::ZERO,
                failures_left: failures,
                failure_reason: PageReason::Http5xx,
            },
        );
        self
    }

    /// Delay responses for `url` (visible under `tokio::time::pause`).
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        if let Some(page) = self.pages.lock().unwrap().get_mut(url) {
            page.delay = delay;
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, deadline: &Deadline) -> PageFetch {
        self.calls.lock().unwrap().push(url.to_string());

        if deadline.expired() {
            return PageFetch::failed(url, PageReason::TimeBudgetExceeded);
        }

        let (delay, outcome) = {
            let mut pages = self.pages.lock().unwrap();
            match pages.get_mut(url) {
                None => (Duration::ZERO, Err(PageReason::Non200Status)),
                Some(page) => {
                    let delay = page.delay;
                    if page.failures_left > 0 {
                        page.failures_left -= 1;
                        (delay, Err(page.failure_reason))
                    } else if page.reason.is_ok() {
                        (delay, Ok(page.html.clone().unwrap_or_default()))
                    } else {
                        (delay, Err(page.reason))
                    }
                }
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
            if deadline.expired() {
                return PageFetch::failed(url, PageReason::TimeBudgetExceeded);
            }
        }

        match outcome {
            Err(reason) => PageFetch::failed(url, reason),
            Ok(html) => {
                let cleaned = clean::visible_text(&html);
                PageFetch {
                    url: url.to_string(),
                    final_url: url.to_string(),
                    status: 200,
                    content_type: Some("text/html".to_string()),
                    content_hash: Some(content_hash(&html)),
                    cleaned_text: Some(cleaned),
                    html: Some(html),
                    redirect_chain: Vec::new(),
                    fetched_at: Utc::now(),
                    size_bytes: 0,
                    first_byte_ms: 5,
                    total_ms: 10,
                    reason: PageReason::Ok,
                }
            }
        }
    }
}
