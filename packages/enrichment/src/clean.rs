//! Visible-text extraction and the page quality gate.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

pub const MIN_VISIBLE_CHARS: usize = 200;

const PLACEHOLDER_PATTERNS: &[&str] = &[
    r"coming\s+soon",
    r"under\s+construction",
    r"maintenance\s+mode",
    r"site\s+is\s+being\s+built",
];

fn strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>|<template[^>]*>.*?</template>|<svg[^>]*>.*?</svg>|<!--.*?-->",
        )
        .expect("strip regex")
    })
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("(?i){}", PLACEHOLDER_PATTERNS.join("|"))).expect("placeholder regex")
    })
}

/// Reduce an HTML document to visible prose: drop script/style/comments,
/// take text nodes line by line, collapse runs of whitespace.
pub fn visible_text(html: &str) -> String {
    let stripped = strip_re().replace_all(html, " ");
    let document = Html::parse_document(&stripped);

    let body_selector = Selector::parse("body").expect("body selector");
    let mut lines: Vec<String> = Vec::new();
    let texts: Box<dyn Iterator<Item = &str> + '_> = match document.select(&body_selector).next() {
        Some(body) => Box::new(body.text()),
        None => Box::new(document.root_element().text()),
    };
    for chunk in texts {
        let collapsed = chunk.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// Whether cleaned text carries enough signal to store and extract from.
/// Short pages and builder placeholders fail the gate.
pub fn passes_quality_gate(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_VISIBLE_CHARS {
        return false;
    }
    !placeholder_re().is_match(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_collapses_whitespace() {
        let html = r#"
            <html><head><style>p { color: red }</style></head>
            <body>
              <script>alert("x")</script>
              <p>Open    daily
                 from 9am.</p>
              <!-- nav below -->
              <div>Fresh pasta &amp; wine.</div>
            </body></html>
        "#;
        let text = visible_text(html);
        assert!(text.contains("Open daily from 9am."));
        assert!(text.contains("Fresh pasta & wine."));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn gate_rejects_thin_content() {
        assert!(!passes_quality_gate("Welcome."));
        let long = "Our menu changes with the seasons. ".repeat(20);
        assert!(passes_quality_gate(&long));
    }

    #[test]
    fn gate_rejects_placeholders() {
        let page = format!("{} Coming soon! {}", "x".repeat(150), "y".repeat(150));
        assert!(!passes_quality_gate(&page));
        let built = format!("{} this site is   being built {}", "x".repeat(150), "y".repeat(150));
        assert!(!passes_quality_gate(&built));
    }
}
