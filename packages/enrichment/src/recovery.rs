//! Website recovery candidate derivation.
//!
//! For venues with no canonical website, propose homepage candidates from
//! the venue's email domain and social-profile hints. Deriving is pure;
//! persisting candidates and writing the chosen URL to the venue is the
//! server's job.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::registered_domain;

const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com", "instagram.com", "x.com", "twitter.com", "tiktok.com", "linkedin.com",
    "youtube.com", "youtu.be", "pinterest.com",
];

/// "Link in bio" hubs; never a venue's own website.
const LINK_HUBS: &[&str] = &["linktr.ee", "bio.link", "beacons.ai", "taplink.cc", "campsite.bio"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    EmailDomain,
    Search,
    Social,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryMethod::EmailDomain => "email_domain",
            RecoveryMethod::Search => "search",
            RecoveryMethod::Social => "social",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryCandidate {
    pub url: String,
    pub confidence: f64,
    pub method: RecoveryMethod,
}

fn email_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9.-]*\.[a-z]{2,}$").expect("email domain regex"))
}

fn is_social_or_hub(host: &str) -> bool {
    let domain = registered_domain(host);
    SOCIAL_HOSTS.contains(&domain.as_str()) || LINK_HUBS.contains(&domain.as_str())
}

/// Canonical `https://domain` form: https scheme, no www, no path.
fn canonical_https(host: &str) -> String {
    let host = host.trim().trim_end_matches('/').to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    format!("https://{host}")
}

fn email_domain_candidate(email: &str) -> Option<RecoveryCandidate> {
    let domain = email.split_once('@')?.1.trim().to_ascii_lowercase();
    if !email_domain_re().is_match(&domain) || is_social_or_hub(&domain) {
        return None;
    }
    // Free mail providers say nothing about the venue's site.
    if matches!(
        registered_domain(&domain).as_str(),
        "gmail.com" | "yahoo.com" | "hotmail.com" | "outlook.com" | "icloud.com" | "aol.com"
    ) {
        return None;
    }
    Some(RecoveryCandidate {
        url: canonical_https(&domain),
        confidence: 0.9,
        method: RecoveryMethod::EmailDomain,
    })
}

/// Social profile URLs occasionally carry the real homepage in a query
/// param (share/redirect links). Conservative: only an explicit http(s)
/// URL inside the query is taken, and never a social/link-hub host.
fn social_hint_candidate(profile_url: &str) -> Option<RecoveryCandidate> {
    let parsed = Url::parse(profile_url).ok()?;
    let host = parsed.host_str()?;
    if !is_social_or_hub(host) {
        // A non-social URL in the socials list is itself a plausible site.
        return Some(RecoveryCandidate {
            url: canonical_https(host),
            confidence: 0.6,
            method: RecoveryMethod::Social,
        });
    }
    for (_, value) in parsed.query_pairs() {
        if let Ok(embedded) = Url::parse(&value) {
            if matches!(embedded.scheme(), "http" | "https") {
                let embedded_host = embedded.host_str()?;
                if !is_social_or_hub(embedded_host) {
                    return Some(RecoveryCandidate {
                        url: canonical_https(embedded_host),
                        confidence: 0.5,
                        method: RecoveryMethod::Social,
                    });
                }
            }
        }
    }
    None
}

/// Derive all candidates for a venue, highest confidence first, deduped by
/// URL.
pub fn derive_candidates(email: Option<&str>, social_urls: &[String]) -> Vec<RecoveryCandidate> {
    let mut candidates: Vec<RecoveryCandidate> = Vec::new();
    if let Some(email) = email {
        candidates.extend(email_domain_candidate(email));
    }
    for social in social_urls {
        candidates.extend(social_hint_candidate(social));
    }
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.url.len().cmp(&b.url.len()))
    });
    candidates.dedup_by(|a, b| a.url == b.url);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_domain_becomes_https_homepage() {
        let cands = derive_candidates(Some("info@the-olive-tree.co.uk"), &[]);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].url, "https://the-olive-tree.co.uk");
        assert_eq!(cands[0].method, RecoveryMethod::EmailDomain);
        assert!(cands[0].confidence > 0.8);
    }

    #[test]
    fn free_mail_providers_are_ignored() {
        assert!(derive_candidates(Some("venue@gmail.com"), &[]).is_empty());
    }

    #[test]
    fn social_hosts_are_never_candidates() {
        let socials = vec!["https://www.instagram.com/thevenue/".to_string()];
        assert!(derive_candidates(None, &socials).is_empty());
    }

    #[test]
    fn link_hubs_are_never_candidates() {
        let socials = vec!["https://linktr.ee/thevenue".to_string()];
        assert!(derive_candidates(None, &socials).is_empty());
    }

    #[test]
    fn embedded_homepage_in_social_query_is_used() {
        let socials =
            vec!["https://www.facebook.com/l.php?u=https%3A%2F%2Fthevenue.example%2F".to_string()];
        let cands = derive_candidates(None, &socials);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].url, "https://thevenue.example");
        assert_eq!(cands[0].method, RecoveryMethod::Social);
    }

    #[test]
    fn highest_confidence_first() {
        let socials = vec!["https://thevenue.example/about".to_string()];
        let cands = derive_candidates(Some("hello@thevenue.example"), &socials);
        assert_eq!(cands.len(), 1, "same URL deduped");
        assert_eq!(cands[0].method, RecoveryMethod::EmailDomain);
    }
}
