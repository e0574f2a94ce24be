//! HTTP downloader with strict per-phase budgets.
//!
//! Every failure is classified into a [`PageReason`] and returned as data;
//! nothing network-shaped is ever thrown past the orchestrator. Redirects
//! are followed manually (max 5 hops) so the chain can be recorded.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::clean;
use crate::deadline::Deadline;
use crate::error::PageReason;
use crate::page::{content_hash, PageFetch};
use crate::robots::RobotsCache;

const MAX_REDIRECTS: usize = 5;
/// Below this remaining budget a fetch cannot complete its connect +
/// first-byte + read phases, so it is not attempted.
pub const MIN_FETCH_BUDGET: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub first_byte_timeout: Duration,
    pub read_timeout: Duration,
    pub hard_wall: Duration,
    pub size_limit_bytes: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            user_agent: "VenueScopeBot/0.1 (+https://venuescope.example/crawler)".to_string(),
            connect_timeout: Duration::from_secs(1),
            first_byte_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            hard_wall: Duration::from_secs(3),
            size_limit_bytes: 2_000_000,
        }
    }
}

/// Seam between the orchestrator and the network, mockable in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, deadline: &Deadline) -> PageFetch;
}

pub struct Downloader {
    client: reqwest::Client,
    robots: RobotsCache,
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5"
                .parse()
                .expect("accept header"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            "en;q=0.8".parse().expect("accept-language header"),
        );

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            robots: RobotsCache::default(),
            config,
        }
    }

    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    async fn fetch_inner(&self, url: &str, deadline: &Deadline) -> PageFetch {
        let start = Instant::now();

        if !deadline.allows(MIN_FETCH_BUDGET) {
            return PageFetch::failed(url, PageReason::TimeBudgetExceeded);
        }

        let Ok(parsed) = Url::parse(url) else {
            return PageFetch::failed(url, PageReason::NetworkError);
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return PageFetch::failed(url, PageReason::NetworkError);
        }

        if !self
            .robots
            .allowed(&self.client, &parsed, &self.config.user_agent)
            .await
        {
            return PageFetch::failed(url, PageReason::RobotsDisallowed);
        }

        let wall = self.config.hard_wall.min(deadline.remaining());
        match tokio::time::timeout(wall, self.follow_and_read(url, &parsed, deadline, start)).await
        {
            Ok(fetch) => fetch,
            Err(_) => {
                let reason = if deadline.expired() {
                    PageReason::TimeBudgetExceeded
                } else {
                    PageReason::NetworkTimeout
                };
                let mut fetch = PageFetch::failed(url, reason);
                fetch.total_ms = start.elapsed().as_millis() as i64;
                fetch
            }
        }
    }

    async fn follow_and_read(
        &self,
        requested: &str,
        parsed: &Url,
        deadline: &Deadline,
        start: Instant,
    ) -> PageFetch {
        let mut redirect_chain: Vec<String> = Vec::new();
        let mut current = parsed.clone();

        let response = loop {
            if deadline.expired() {
                let mut f = PageFetch::failed(requested, PageReason::TimeBudgetExceeded);
                f.redirect_chain = redirect_chain;
                return f;
            }

            let header_budget = self.config.connect_timeout + self.config.first_byte_timeout;
            let sent = tokio::time::timeout(header_budget, self.client.get(current.clone()).send())
                .await;

            let response = match sent {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => {
                    let mut f = PageFetch::failed(requested, classify_reqwest(&e));
                    f.final_url = current.to_string();
                    f.redirect_chain = redirect_chain;
                    f.total_ms = start.elapsed().as_millis() as i64;
                    return f;
                }
                Err(_) => {
                    let mut f = PageFetch::failed(requested, PageReason::NetworkTimeout);
                    f.final_url = current.to_string();
                    f.redirect_chain = redirect_chain;
                    f.total_ms = start.elapsed().as_millis() as i64;
                    return f;
                }
            };

            if response.status().is_redirection() {
                let Some(next) = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| current.join(loc).ok())
                else {
                    break response;
                };
                if !matches!(next.scheme(), "http" | "https")
                    || redirect_chain.len() >= MAX_REDIRECTS
                {
                    let mut f = PageFetch::failed(requested, PageReason::NetworkError);
                    f.final_url = next.to_string();
                    f.redirect_chain = redirect_chain;
                    return f;
                }
                debug!(from = %current, to = %next, "following redirect");
                redirect_chain.push(current.to_string());
                current = next;
                continue;
            }

            break response;
        };

        let first_byte_ms = start.elapsed().as_millis() as i64;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let final_url = response.url().to_string();

        let reason = match status {
            200 => PageReason::Ok,
            429 => PageReason::Http429,
            s if s >= 500 => PageReason::Http5xx,
            _ => PageReason::Non200Status,
        };
        if !reason.is_ok() {
            return PageFetch {
                url: requested.to_string(),
                final_url,
                status,
                content_type,
                html: None,
                cleaned_text: None,
                content_hash: None,
                redirect_chain,
                fetched_at: Utc::now(),
                size_bytes: 0,
                first_byte_ms,
                total_ms: start.elapsed().as_millis() as i64,
                reason,
            };
        }

        if !is_html(content_type.as_deref()) {
            return PageFetch {
                url: requested.to_string(),
                final_url,
                status,
                content_type,
                html: None,
                cleaned_text: None,
                content_hash: None,
                redirect_chain,
                fetched_at: Utc::now(),
                size_bytes: 0,
                first_byte_ms,
                total_ms: start.elapsed().as_millis() as i64,
                reason: PageReason::InvalidMime,
            };
        }

        let (body, read_reason) = self.read_body(response, deadline).await;
        let total_ms = start.elapsed().as_millis() as i64;
        let size_bytes = body.len();

        if let Some(reason) = read_reason {
            return PageFetch {
                url: requested.to_string(),
                final_url,
                status,
                content_type,
                html: None,
                cleaned_text: None,
                content_hash: None,
                redirect_chain,
                fetched_at: Utc::now(),
                size_bytes,
                first_byte_ms,
                total_ms,
                reason,
            };
        }

        let html = String::from_utf8_lossy(&body).into_owned();
        let hash = content_hash(&html);
        let cleaned = clean::visible_text(&html);

        PageFetch {
            url: requested.to_string(),
            final_url,
            status,
            content_type,
            html: Some(html),
            cleaned_text: Some(cleaned),
            content_hash: Some(hash),
            redirect_chain,
            fetched_at: Utc::now(),
            size_bytes,
            first_byte_ms,
            total_ms,
            reason: PageReason::Ok,
        }
    }

    /// Stream the body under the read budget, enforcing the size cap and
    /// the crawl deadline chunk by chunk.
    async fn read_body(
        &self,
        response: reqwest::Response,
        deadline: &Deadline,
    ) -> (Vec<u8>, Option<PageReason>) {
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        let read_started = Instant::now();

        loop {
            if deadline.expired() {
                return (body, Some(PageReason::TimeBudgetExceeded));
            }
            let remaining_read = self
                .config
                .read_timeout
                .checked_sub(read_started.elapsed())
                .unwrap_or(Duration::ZERO);
            if remaining_read.is_zero() {
                return (body, Some(PageReason::NetworkTimeout));
            }

            match tokio::time::timeout(remaining_read, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    body.extend_from_slice(&chunk);
                    if body.len() > self.config.size_limit_bytes {
                        body.truncate(self.config.size_limit_bytes);
                        return (body, Some(PageReason::SizeExceeded));
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "body read failed");
                    return (body, Some(classify_reqwest(&e)));
                }
                Ok(None) => return (body, None),
                Err(_) => return (body, Some(PageReason::NetworkTimeout)),
            }
        }
    }
}

#[async_trait]
impl Fetcher for Downloader {
    async fn fetch(&self, url: &str, deadline: &Deadline) -> PageFetch {
        let fetch = self.fetch_inner(url, deadline).await;
        debug!(
            url = %fetch.url,
            status = fetch.status,
            reason = %fetch.reason,
            bytes = fetch.size_bytes,
            total_ms = fetch.total_ms,
            "fetch finished"
        );
        fetch
    }
}

fn is_html(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    matches!(mime.as_str(), "text/html" | "application/xhtml+xml")
}

fn classify_reqwest(e: &reqwest::Error) -> PageReason {
    if e.is_timeout() {
        return PageReason::NetworkTimeout;
    }
    // reqwest hides the cause behind opaque sources; the rendered chain is
    // the only portable discriminator for dns vs tls.
    let rendered = format!("{e:?}").to_ascii_lowercase();
    if rendered.contains("dns") || rendered.contains("name or service") {
        PageReason::DnsFailure
    } else if rendered.contains("certificate") || rendered.contains("tls") || rendered.contains("ssl")
    {
        PageReason::TlsError
    } else {
        PageReason::NetworkError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_mime_filter() {
        assert!(is_html(Some("text/html")));
        assert!(is_html(Some("text/html; charset=utf-8")));
        assert!(is_html(Some("application/xhtml+xml")));
        assert!(!is_html(Some("application/pdf")));
        assert!(!is_html(Some("image/png")));
        assert!(!is_html(None));
    }

    #[tokio::test]
    async fn expired_deadline_short_circuits() {
        let downloader = Downloader::new(DownloaderConfig::default());
        let deadline = Deadline::after(Duration::ZERO);
        let fetch = downloader.fetch("https://v.example/", &deadline).await;
        assert_eq!(fetch.reason, PageReason::TimeBudgetExceeded);
        assert_eq!(fetch.status, 0);
    }

    #[tokio::test]
    async fn invalid_url_is_classified() {
        let downloader = Downloader::new(DownloaderConfig::default());
        let deadline = Deadline::after(Duration::from_secs(5));
        let fetch = downloader.fetch("not a url", &deadline).await;
        assert_eq!(fetch.reason, PageReason::NetworkError);
    }
}
