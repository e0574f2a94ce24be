//! Typed errors and page outcome codes for the enrichment library.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Fetch outcomes are
//! deliberately *not* errors: the downloader classifies every failure into a
//! [`PageReason`] so the orchestrator can persist it and decide job outcome.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// An on-disk code that no longer maps to a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown code: {0}")]
pub struct UnknownCode(pub String);

/// Stable per-page outcome codes, persisted on `scraped_pages.reason` and
/// `crawl_jobs.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageReason {
    Ok,
    NetworkTimeout,
    DnsFailure,
    TlsError,
    NetworkError,
    Http5xx,
    Http429,
    RobotsDisallowed,
    InvalidMime,
    Non200Status,
    ThinContent,
    DuplicateContent,
    OffDomainLink,
    SizeExceeded,
    TimeBudgetExceeded,
    NoWebsite,
    Shutdown,
}

impl PageReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageReason::Ok => "ok",
            PageReason::NetworkTimeout => "network_timeout",
            PageReason::DnsFailure => "dns_failure",
            PageReason::TlsError => "tls_error",
            PageReason::NetworkError => "network_error",
            PageReason::Http5xx => "http_5xx",
            PageReason::Http429 => "http_429",
            PageReason::RobotsDisallowed => "robots_disallowed",
            PageReason::InvalidMime => "invalid_mime",
            PageReason::Non200Status => "non_200_status",
            PageReason::ThinContent => "thin_content",
            PageReason::DuplicateContent => "duplicate_content",
            PageReason::OffDomainLink => "off_domain_link",
            PageReason::SizeExceeded => "size_exceeded",
            PageReason::TimeBudgetExceeded => "time_budget_exceeded",
            PageReason::NoWebsite => "no_website",
            PageReason::Shutdown => "shutdown",
        }
    }

    /// Transient classes are eligible for retry through the rate gate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PageReason::NetworkTimeout
                | PageReason::DnsFailure
                | PageReason::TlsError
                | PageReason::NetworkError
                | PageReason::Http5xx
                | PageReason::Http429
        )
    }

    /// True when the fetch produced a usable page.
    pub fn is_ok(&self) -> bool {
        matches!(self, PageReason::Ok)
    }
}

impl fmt::Display for PageReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageReason {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ok" => PageReason::Ok,
            "network_timeout" => PageReason::NetworkTimeout,
            "dns_failure" => PageReason::DnsFailure,
            "tls_error" => PageReason::TlsError,
            "network_error" => PageReason::NetworkError,
            "http_5xx" => PageReason::Http5xx,
            "http_429" => PageReason::Http429,
            "robots_disallowed" => PageReason::RobotsDisallowed,
            "invalid_mime" => PageReason::InvalidMime,
            "non_200_status" => PageReason::Non200Status,
            "thin_content" => PageReason::ThinContent,
            "duplicate_content" => PageReason::DuplicateContent,
            "off_domain_link" => PageReason::OffDomainLink,
            "size_exceeded" => PageReason::SizeExceeded,
            "time_budget_exceeded" => PageReason::TimeBudgetExceeded,
            "no_website" => PageReason::NoWebsite,
            "shutdown" => PageReason::Shutdown,
            _ => return Err(UnknownCode(s.to_string())),
        })
    }
}

// serde piggybacks on the stable string codes.
impl serde::Serialize for PageReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for PageReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_round_trip() {
        for reason in [
            PageReason::Ok,
            PageReason::NetworkTimeout,
            PageReason::RobotsDisallowed,
            PageReason::TimeBudgetExceeded,
            PageReason::Shutdown,
        ] {
            assert_eq!(reason.as_str().parse::<PageReason>().unwrap(), reason);
        }
    }

    #[test]
    fn transient_classes() {
        assert!(PageReason::NetworkTimeout.is_transient());
        assert!(PageReason::Http429.is_transient());
        assert!(!PageReason::RobotsDisallowed.is_transient());
        assert!(!PageReason::InvalidMime.is_transient());
        assert!(!PageReason::SizeExceeded.is_transient());
    }
}
