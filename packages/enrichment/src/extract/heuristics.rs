//! Heuristic extraction from cleaned page text: targeted regexes and
//! keyword matching, applied per page type. Everything emitted is verbatim
//! source text; nothing is generated.

use std::sync::OnceLock;

use regex::Regex;

use crate::page::{PageRecord, PageType};

use super::hours::{normalize_time, Day, HoursMap};
use super::{Candidate, Contact, FactValue, FieldName, MenuItem};

const MAX_MENU_ITEMS: usize = 50;
const DESCRIPTION_MIN_WORDS: usize = 100;
const DESCRIPTION_MAX_WORDS: usize = 140;

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d\s().\-]{6,}\d").expect("phone regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[A-Z0-9._%+\-]+@[A-Z0-9.\-]+\.[A-Z]{2,}").expect("email regex")
    })
}

fn day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(mon|tue|tues|wed|thu|thurs|fri|sat|sun)(?:day|sday|nesday|rsday|urday)?\b")
            .expect("day regex")
    })
}

fn time_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2}[:.h]\d{2})\s*(?:–|—|-|to|till|until)\s*(\d{1,2}[:.h]\d{2})")
            .expect("time range regex")
    })
}

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([€£$])\s?(\d+(?:[.,]\d{1,2})?)").expect("currency regex"))
}

fn free_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(free (entry|admission|entrance)|admission( is)? free)\b")
            .expect("free entry regex")
    })
}

const ADMISSION_KEYWORDS: &[&str] = &["ticket", "admission", "entry", "adult", "child", "concession"];

const FEATURE_KEYWORDS: &[&str] = &[
    "wifi", "wi-fi", "parking", "terrace", "garden", "outdoor seating", "dog friendly",
    "dog-friendly", "wheelchair", "accessible", "vegan", "vegetarian", "gluten free",
    "gluten-free", "live music", "takeaway", "delivery", "family friendly", "kids menu",
    "air conditioning",
];

/// Extract heuristic candidates from one page's cleaned text.
pub fn extract(text: &str, record: &PageRecord) -> Vec<Candidate> {
    let mut out = Vec::new();
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    // Contact details can sit on any page.
    let mut contact = Contact::default();
    if let Some(m) = email_re().find(text) {
        contact.email = Some(m.as_str().to_string());
    }
    if let Some(m) = phone_re().find(text) {
        let digits: String = m
            .as_str()
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        if digits.trim_start_matches('+').len() >= 7 {
            contact.phone = Some(m.as_str().trim().to_string());
        }
    }
    if !contact.is_empty() {
        out.push(candidate(record, FieldName::Contact, FactValue::Contact(contact)));
    }

    // Hours lines on hours-ish pages.
    if matches!(
        record.page_type,
        PageType::Hours | PageType::Contact | PageType::About | PageType::Homepage
    ) {
        let hours = extract_hours(&lines);
        if !hours.is_empty() {
            out.push(candidate(record, FieldName::Hours, FactValue::Hours(hours)));
        }
    }

    // Fees on fee-ish pages.
    if matches!(
        record.page_type,
        PageType::Fees | PageType::About | PageType::Homepage
    ) {
        if free_entry_re().is_match(text) {
            out.push(candidate(record, FieldName::Fees, FactValue::NotApplicable));
        } else if let Some(fee_line) = fee_line(&lines) {
            out.push(candidate(record, FieldName::Fees, FactValue::Text(fee_line)));
        }
    }

    // Menu pages: the page itself is the menu URL; items and price band
    // come from priced lines.
    if record.page_type == PageType::Menu {
        out.push(candidate(record, FieldName::MenuUrl, FactValue::Text(record.url.clone())));

        let items = menu_items(&lines);
        if !items.is_empty() {
            if let Some(band) = price_band(&items) {
                out.push(candidate(record, FieldName::PriceRange, FactValue::Text(band)));
            }
            out.push(candidate(record, FieldName::MenuItems, FactValue::MenuItems(items)));
        }
    }

    // Feature keywords from short lines.
    if matches!(
        record.page_type,
        PageType::About | PageType::Homepage | PageType::Other
    ) {
        let features = feature_list(&lines);
        if !features.is_empty() {
            out.push(candidate(record, FieldName::Features, FactValue::List(features)));
        }

        if let Some(description) = assemble_description(text) {
            out.push(candidate(record, FieldName::Description, FactValue::Text(description)));
        }
    }

    out
}

fn candidate(record: &PageRecord, field: FieldName, value: FactValue) -> Candidate {
    Candidate {
        field,
        value,
        source_url: record.url.clone(),
        page_type: record.page_type,
        structured: false,
        fetched_at: record.fetched_at,
    }
}

/// Lines like "Mon-Fri 9:00-17:00" or "Saturday 10.00 to 14.00". A leading
/// day span expands to every day in the span.
fn extract_hours(lines: &[&str]) -> HoursMap {
    let mut hours = HoursMap::default();
    for line in lines {
        let days: Vec<Day> = day_re()
            .find_iter(line)
            .filter_map(|m| Day::from_token(m.as_str()))
            .collect();
        if days.is_empty() {
            continue;
        }
        let ranges: Vec<(String, String)> = time_range_re()
            .captures_iter(line)
            .filter_map(|cap| {
                let open = normalize_time(&cap[1])?;
                let close = normalize_time(&cap[2])?;
                Some((open, close))
            })
            .collect();
        if ranges.is_empty() {
            continue;
        }

        let target_days = if days.len() == 2 && looks_like_day_span(line, days[0], days[1]) {
            expand_span(days[0], days[1])
        } else {
            days
        };
        for day in target_days {
            for (open, close) in &ranges {
                hours.add_range(day, open.clone(), close.clone());
            }
        }
    }
    hours
}

fn looks_like_day_span(line: &str, _from: Day, _to: Day) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\b\w+day\s*(?:–|—|-|to)\s*\w+day\b|\b(mon|tue|wed|thu|fri|sat|sun)\s*(?:–|—|-|to)\s*(mon|tue|wed|thu|fri|sat|sun)\b")
            .expect("day span regex")
    });
    re.is_match(line)
}

fn expand_span(from: Day, to: Day) -> Vec<Day> {
    let all = Day::ALL;
    let start = all.iter().position(|d| *d == from).unwrap_or(0);
    let end = all.iter().position(|d| *d == to).unwrap_or(6);
    if start <= end {
        all[start..=end].to_vec()
    } else {
        // wrap-around span like "Sat-Mon"
        all[start..].iter().chain(all[..=end].iter()).copied().collect()
    }
}

/// The shortest line mentioning money and an admission keyword, to avoid
/// quoting walls of text.
fn fee_line(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .filter(|l| currency_re().is_match(l))
        .filter(|l| {
            let lower = l.to_ascii_lowercase();
            ADMISSION_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .min_by_key(|l| l.len())
        .map(|l| l.chars().take(200).collect::<String>())
}

/// Lines carrying a trailing price become menu items; the name is the line
/// minus its price tail.
fn menu_items(lines: &[&str]) -> Vec<MenuItem> {
    let mut items = Vec::new();
    for line in lines {
        if items.len() >= MAX_MENU_ITEMS {
            break;
        }
        if line.len() < 3 || line.len() > 120 {
            continue;
        }
        let Some(cap) = currency_re().captures(line) else {
            continue;
        };
        let price = format!("{}{}", &cap[1], &cap[2]);
        let name = line[..cap.get(0).expect("capture 0").start()]
            .trim()
            .trim_end_matches(['.', '…', '-', '–'])
            .trim()
            .to_string();
        if name.len() < 3 {
            continue;
        }
        items.push(MenuItem {
            name,
            price: Some(price),
        });
    }
    items
}

/// Bucket a menu's average price into $ … $$$$ (same symbol as the menu's
/// currency).
fn price_band(items: &[MenuItem]) -> Option<String> {
    let mut symbol = None;
    let mut values = Vec::new();
    for item in items {
        let Some(price) = &item.price else {
            continue;
        };
        let cap = currency_re().captures(price)?;
        symbol.get_or_insert_with(|| cap[1].to_string());
        if let Ok(v) = cap[2].replace(',', ".").parse::<f64>() {
            values.push(v);
        }
    }
    let symbol = symbol?;
    if values.is_empty() {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let repeat = if avg < 10.0 {
        1
    } else if avg < 25.0 {
        2
    } else if avg < 45.0 {
        3
    } else {
        4
    };
    Some(symbol.repeat(repeat))
}

fn feature_list(lines: &[&str]) -> Vec<String> {
    let mut features = Vec::new();
    for line in lines {
        if line.len() > 60 {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        for keyword in FEATURE_KEYWORDS {
            if lower.contains(keyword) && !features.iter().any(|f| f == line) {
                features.push(line.to_string());
                break;
            }
        }
    }
    features
}

/// Verbatim description: consecutive sentences from the page, between 100
/// and 140 words, cut at a sentence boundary. None if the page doesn't
/// carry enough prose.
fn assemble_description(text: &str) -> Option<String> {
    let mut words = 0usize;
    let mut picked: Vec<&str> = Vec::new();

    for sentence in split_sentences(text) {
        let count = sentence.split_whitespace().count();
        if count < 4 {
            continue;
        }
        if words + count > DESCRIPTION_MAX_WORDS {
            break;
        }
        picked.push(sentence);
        words += count;
    }

    if words < DESCRIPTION_MIN_WORDS {
        return None;
    }
    Some(picked.join(" "))
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::error::PageReason;
    use crate::page::DiscoveryMethod;

    use super::*;

    fn record(page_type: PageType, url: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            page_type,
            fetched_at: Utc::now(),
            valid_until: None,
            http_status: 200,
            content_type: Some("text/html".to_string()),
            content_hash: None,
            cleaned_text: None,
            discovered_via: DiscoveryMethod::Heuristic,
            redirect_chain: Vec::new(),
            reason: PageReason::Ok,
            size_bytes: 0,
            total_ms: 0,
            first_byte_ms: 0,
        }
    }

    fn find<'a>(cands: &'a [Candidate], field: FieldName) -> Option<&'a Candidate> {
        cands.iter().find(|c| c.field == field)
    }

    #[test]
    fn phone_and_email_found() {
        let text = "Call us on +44 20 1234 5678\nor write to bookings@venue.example today.";
        let cands = extract(text, &record(PageType::Contact, "https://v.example/contact"));
        let contact = find(&cands, FieldName::Contact).unwrap();
        let FactValue::Contact(c) = &contact.value else {
            panic!("expected contact");
        };
        assert_eq!(c.phone.as_deref(), Some("+44 20 1234 5678"));
        assert_eq!(c.email.as_deref(), Some("bookings@venue.example"));
    }

    #[test]
    fn day_span_expands() {
        let text = "Opening hours\nMon-Fri 9:00-17:00\nSaturday 10.00 to 14.00";
        let cands = extract(text, &record(PageType::Hours, "https://v.example/hours"));
        let FactValue::Hours(h) = &find(&cands, FieldName::Hours).unwrap().value else {
            panic!("expected hours");
        };
        assert_eq!(h.0.len(), 6);
        assert_eq!(h.0[&Day::Wed], vec![("09:00".to_string(), "17:00".to_string())]);
        assert_eq!(h.0[&Day::Sat], vec![("10:00".to_string(), "14:00".to_string())]);
    }

    #[test]
    fn menu_page_yields_items_and_price_band() {
        let text = "Starters\nGarlic bread £4.50\nSoup of the day £6.00\nMains\nRib-eye steak £24.00";
        let cands = extract(text, &record(PageType::Menu, "https://v.example/menu"));

        let menu_url = find(&cands, FieldName::MenuUrl).unwrap();
        assert_eq!(menu_url.value, FactValue::Text("https://v.example/menu".to_string()));

        let FactValue::MenuItems(items) = &find(&cands, FieldName::MenuItems).unwrap().value else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].name, "Garlic bread");
        assert_eq!(items[0].price.as_deref(), Some("£4.50"));

        let band = find(&cands, FieldName::PriceRange).unwrap();
        assert_eq!(band.value, FactValue::Text("££".to_string()));
    }

    #[test]
    fn menu_items_capped_at_fifty() {
        let lines: Vec<String> = (0..80).map(|i| format!("Dish number {i} £10.00")).collect();
        let text = lines.join("\n");
        let cands = extract(&text, &record(PageType::Menu, "https://v.example/menu"));
        let FactValue::MenuItems(items) = &find(&cands, FieldName::MenuItems).unwrap().value else {
            panic!("expected items");
        };
        assert_eq!(items.len(), MAX_MENU_ITEMS);
    }

    #[test]
    fn free_entry_marks_fees_not_applicable() {
        let text = "Visit us\nFree entry for all visitors, every day.";
        let cands = extract(text, &record(PageType::Fees, "https://v.example/visit"));
        assert_eq!(find(&cands, FieldName::Fees).unwrap().value, FactValue::NotApplicable);
    }

    #[test]
    fn shortest_admission_line_wins() {
        let text = "Tickets for the big summer exhibition with many extras cost £18 per adult visitor\nAdults £12";
        let cands = extract(text, &record(PageType::Fees, "https://v.example/tickets"));
        assert_eq!(
            find(&cands, FieldName::Fees).unwrap().value,
            FactValue::Text("Adults £12".to_string())
        );
    }

    #[test]
    fn description_respects_word_bounds() {
        let sentence = "The dining room looks over the harbour and serves fish landed the same morning.";
        let text = format!("{} ", sentence).repeat(20);
        let cands = extract(&text, &record(PageType::About, "https://v.example/about"));
        let FactValue::Text(desc) = &find(&cands, FieldName::Description).unwrap().value else {
            panic!("expected description");
        };
        let words = desc.split_whitespace().count();
        assert!((DESCRIPTION_MIN_WORDS..=DESCRIPTION_MAX_WORDS).contains(&words), "{words} words");
        assert!(desc.ends_with('.'));
    }

    #[test]
    fn short_pages_produce_no_description() {
        let text = "A pub. Good beer.";
        let cands = extract(text, &record(PageType::About, "https://v.example/about"));
        assert!(find(&cands, FieldName::Description).is_none());
    }

    #[test]
    fn features_from_keyword_lines() {
        let text = "Free WiFi throughout\nDog friendly garden\nOur long story begins in 1970 when the founders met at a market and decided to open a small shop.";
        let cands = extract(text, &record(PageType::About, "https://v.example/about"));
        let FactValue::List(features) = &find(&cands, FieldName::Features).unwrap().value else {
            panic!("expected features");
        };
        assert_eq!(features.len(), 2);
    }
}
