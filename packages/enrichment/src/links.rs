//! Same-site target page discovery.
//!
//! Given a homepage's HTML, finds at most one candidate URL per target type
//! in priority order hours > menu > contact > about > fees, capped at three.
//! Cross-host links are discarded outright (the same-site rule compares
//! registered domains).

use scraper::{Html, Selector};
use url::Url;

use crate::domain::{normalize_url, same_site};
use crate::page::PageType;

pub const MAX_TARGETS: usize = 3;

/// Types eligible for targeted fetches, in priority order.
pub const TARGET_ORDER: [PageType; 5] = [
    PageType::Hours,
    PageType::Menu,
    PageType::Contact,
    PageType::About,
    PageType::Fees,
];

/// Keyword signals per type. URL-path hits are strong, anchor-text hits are
/// weak. Includes light multilingual synonyms for European venue sites.
fn keywords(page_type: PageType) -> &'static [&'static str] {
    match page_type {
        PageType::Hours => &[
            "hours", "opening", "opening-times", "times", "horaires", "horario", "orari",
            "offnungszeiten", "öffnungszeiten", "openingstijden",
        ],
        PageType::Menu => &[
            "menu", "food", "drinks", "lunch", "dinner", "carte", "carta", "speisekarte",
            "menukaart",
        ],
        PageType::Contact => &[
            "contact", "contact-us", "find-us", "kontakt", "contacto", "contatti", "impressum",
        ],
        PageType::About => &[
            "about", "about-us", "our-story", "who-we-are", "a-propos", "uber-uns", "chi-siamo",
            "sobre",
        ],
        PageType::Fees => &[
            "fees", "tickets", "pricing", "prices", "admission", "visit", "tarifs", "billets",
            "prezzi", "entradas", "preise",
        ],
        _ => &[],
    }
}

const NEGATIVE_KEYWORDS: &[&str] = &[
    "privacy", "terms", "cookies", "careers", "jobs", "press", "login", "signin", "account",
    "admin", "cart", "checkout", "newsletter", "blog", "gift-card", "sitemap",
];

const SKIP_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".zip", ".jpg", ".jpeg", ".png", ".gif", ".svg",
    ".css", ".js", ".xml", ".json", ".ico", ".webp",
];

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateLink {
    pub url: String,
    pub page_type: PageType,
    pub anchor_text: String,
}

/// Discover up to `max_targets` same-site candidate links from homepage HTML.
pub fn discover_targets(html: &str, base_url: &Url, max_targets: usize) -> Vec<CandidateLink> {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[href]").expect("anchor selector");

    // (score, path_len, doc_order, candidate) per type; higher score wins,
    // then shorter path, then earlier in the document.
    let mut best: Vec<Option<(u8, usize, usize, CandidateLink)>> = vec![None; TARGET_ORDER.len()];

    for (order, anchor) in document.select(&anchor_selector).enumerate() {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        if !same_site(base_url, &resolved) {
            continue;
        }

        let normalized = normalize_url(&resolved);
        let path_lower = normalized.path().to_ascii_lowercase();
        if SKIP_EXTENSIONS.iter().any(|ext| path_lower.ends_with(ext)) {
            continue;
        }

        let anchor_text = anchor.text().collect::<String>().trim().to_string();
        let anchor_lower = anchor_text.to_ascii_lowercase();
        if contains_any(&path_lower, NEGATIVE_KEYWORDS) || contains_any(&anchor_lower, NEGATIVE_KEYWORDS)
        {
            continue;
        }
        if normalized.path() == "/" || normalized.as_str() == base_url.as_str() {
            continue;
        }

        // First matching type in priority order wins; a URL maps to at most
        // one type.
        for (idx, page_type) in TARGET_ORDER.iter().enumerate() {
            let kws = keywords(*page_type);
            let path_hit = kws.iter().any(|kw| path_token_match(&path_lower, kw));
            let text_hit = kws.iter().any(|kw| anchor_lower.contains(kw));
            if !path_hit && !text_hit {
                continue;
            }

            let score = if path_hit { 2 } else { 1 };
            let candidate = CandidateLink {
                url: normalized.to_string(),
                page_type: *page_type,
                anchor_text: anchor_text.clone(),
            };
            let better = match &best[idx] {
                None => true,
                Some((s, plen, ord, _)) => {
                    (score, std::cmp::Reverse(path_lower.len()), std::cmp::Reverse(order))
                        > (*s, std::cmp::Reverse(*plen), std::cmp::Reverse(*ord))
                }
            };
            if better {
                best[idx] = Some((score, path_lower.len(), order, candidate));
            }
            break;
        }
    }

    best.into_iter()
        .flatten()
        .map(|(_, _, _, c)| c)
        .take(max_targets.min(MAX_TARGETS))
        .collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// A keyword must appear as a whole path token (`/menu`, `/our-menu/`) and
/// not as a substring of an unrelated word.
fn path_token_match(path: &str, keyword: &str) -> bool {
    path.split(|c: char| c == '/' || c == '-' || c == '_' || c == '.')
        .any(|token| token == keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://v.example/").unwrap()
    }

    #[test]
    fn finds_targets_in_priority_order() {
        let html = r#"
            <nav>
              <a href="/about">Our story</a>
              <a href="/menu">Menu</a>
              <a href="/opening-times">Opening times</a>
              <a href="/contact">Contact</a>
            </nav>
        "#;
        let targets = discover_targets(html, &base(), 3);
        let types: Vec<_> = targets.iter().map(|t| t.page_type).collect();
        assert_eq!(types, vec![PageType::Hours, PageType::Menu, PageType::Contact]);
        assert_eq!(targets[0].url, "https://v.example/opening-times");
    }

    #[test]
    fn discards_cross_host_links() {
        let html = r#"
            <a href="https://othersite.example/menu">Menu</a>
            <a href="/menu">Menu</a>
        "#;
        let targets = discover_targets(html, &base(), 3);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://v.example/menu");
    }

    #[test]
    fn one_candidate_per_type_prefers_shorter_path() {
        let html = r#"
            <a href="/menus/seasonal/spring">Menu</a>
            <a href="/menu">Menu</a>
        "#;
        let targets = discover_targets(html, &base(), 3);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://v.example/menu");
    }

    #[test]
    fn negative_keywords_are_skipped() {
        let html = r#"
            <a href="/blog/menu-news">Menu news</a>
            <a href="/privacy">Privacy</a>
        "#;
        assert!(discover_targets(html, &base(), 3).is_empty());
    }

    #[test]
    fn anchor_text_alone_can_classify() {
        let html = r#"<a href="/page-7">Opening hours</a>"#;
        let targets = discover_targets(html, &base(), 3);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].page_type, PageType::Hours);
    }

    #[test]
    fn url_matches_at_most_one_type() {
        // "visit" is a fees keyword, but hours wins the priority scan when
        // both signals are present.
        let html = r#"<a href="/visit/hours">Visit &amp; hours</a>"#;
        let targets = discover_targets(html, &base(), 3);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].page_type, PageType::Hours);
    }

    #[test]
    fn caps_at_three_targets() {
        let html = r#"
            <a href="/hours">Hours</a>
            <a href="/menu">Menu</a>
            <a href="/contact">Contact</a>
            <a href="/about">About</a>
            <a href="/tickets">Tickets</a>
        "#;
        let targets = discover_targets(html, &base(), 5);
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn file_links_are_skipped() {
        let html = r#"<a href="/menu.pdf">Menu</a>"#;
        assert!(discover_targets(html, &base(), 3).is_empty());
    }
}
