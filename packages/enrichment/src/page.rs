//! Page and crawl-outcome types shared between the downloader, the
//! orchestrator, and the server's store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PageReason;

/// What role a fetched page plays for the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Homepage,
    Hours,
    Menu,
    Contact,
    About,
    Fees,
    Other,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Homepage => "homepage",
            PageType::Hours => "hours",
            PageType::Menu => "menu",
            PageType::Contact => "contact",
            PageType::About => "about",
            PageType::Fees => "fees",
            PageType::Other => "other",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = crate::error::UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "homepage" => PageType::Homepage,
            "hours" => PageType::Hours,
            "menu" => PageType::Menu,
            "contact" => PageType::Contact,
            "about" => PageType::About,
            "fees" => PageType::Fees,
            "other" => PageType::Other,
            _ => return Err(crate::error::UnknownCode(s.to_string())),
        })
    }
}

/// How the page URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    DirectUrl,
    SearchApi,
    Heuristic,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::DirectUrl => "direct_url",
            DiscoveryMethod::SearchApi => "search_api",
            DiscoveryMethod::Heuristic => "heuristic",
        }
    }
}

/// Raw result of one HTTP fetch, before quality gating.
#[derive(Debug, Clone)]
pub struct PageFetch {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// Raw HTML body; present only on `reason == Ok`.
    pub html: Option<String>,
    pub cleaned_text: Option<String>,
    pub content_hash: Option<String>,
    pub redirect_chain: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub first_byte_ms: i64,
    pub total_ms: i64,
    pub reason: PageReason,
}

impl PageFetch {
    /// Shorthand for a fetch that failed before any bytes moved.
    pub fn failed(url: &str, reason: PageReason) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 0,
            content_type: None,
            html: None,
            cleaned_text: None,
            content_hash: None,
            redirect_chain: Vec::new(),
            fetched_at: Utc::now(),
            size_bytes: 0,
            first_byte_ms: 0,
            total_ms: 0,
            reason,
        }
    }
}

/// SHA-256 hex digest of a page body; identical bodies across venues
/// collapse to one stored row.
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Row shape for `scraped_pages`, produced by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub page_type: PageType,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub http_status: i32,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub cleaned_text: Option<String>,
    pub discovered_via: DiscoveryMethod,
    pub redirect_chain: Vec<String>,
    pub reason: PageReason,
    pub size_bytes: i64,
    pub total_ms: i64,
    pub first_byte_ms: i64,
}

impl PageRecord {
    pub fn passed_gate(&self) -> bool {
        self.reason.is_ok() && self.cleaned_text.is_some()
    }
}

/// A page plus the transient raw HTML the extractor needs. The HTML never
/// leaves the crawl; only the record is persisted.
#[derive(Debug, Clone)]
pub struct CrawlPage {
    pub record: PageRecord,
    pub html: Option<String>,
}

/// Result of one site crawl, with the telemetry the job row records.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub fetched_count: usize,
    pub aborted_count: usize,
    pub errors_by_class: BTreeMap<String, usize>,
    pub pages: Vec<CrawlPage>,
}

impl CrawlOutcome {
    /// Partial success requires at least a gate-passing homepage.
    pub fn homepage_ok(&self) -> bool {
        self.pages
            .iter()
            .any(|p| p.record.page_type == PageType::Homepage && p.record.passed_gate())
    }

    /// The single reason explaining a total failure, if there is one.
    pub fn failure_reason(&self) -> Option<PageReason> {
        if self.homepage_ok() {
            return None;
        }
        self.pages
            .iter()
            .find(|p| p.record.page_type == PageType::Homepage)
            .map(|p| p.record.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_type_round_trip() {
        for t in [
            PageType::Homepage,
            PageType::Hours,
            PageType::Menu,
            PageType::Contact,
            PageType::About,
            PageType::Fees,
            PageType::Other,
        ] {
            assert_eq!(t.as_str().parse::<PageType>().unwrap(), t);
        }
    }

    #[test]
    fn identical_bodies_hash_identically() {
        let a = content_hash("<html>about us</html>");
        let b = content_hash("<html>about us</html>");
        let c = content_hash("<html>about them</html>");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
