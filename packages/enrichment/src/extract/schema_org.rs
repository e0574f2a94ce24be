//! Structured-data extraction: inline JSON-LD blocks and description meta
//! tags.

use scraper::{Html, Selector};
use serde_json::Value;

use crate::page::PageRecord;

use super::hours::{normalize_time, Day, HoursMap};
use super::{Candidate, Contact, FactValue, FieldName};

/// Extract all structured-data candidates from one page's raw HTML.
pub fn extract(html: &str, record: &PageRecord) -> Vec<Candidate> {
    let mut out = Vec::new();
    let document = Html::parse_document(html);

    for block in jsonld_blocks(&document) {
        out.extend(candidates_from_block(&block, record));
    }

    if let Some(description) = meta_description(&document) {
        out.push(candidate(record, FieldName::Description, FactValue::Text(description), ));
    }

    out
}

fn candidate(record: &PageRecord, field: FieldName, value: FactValue) -> Candidate {
    Candidate {
        field,
        value,
        source_url: record.url.clone(),
        page_type: record.page_type,
        structured: true,
        fetched_at: record.fetched_at,
    }
}

/// All JSON-LD objects in the document, flattening top-level arrays and
/// `@graph` containers.
fn jsonld_blocks(document: &Html) -> Vec<Value> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).expect("jsonld selector");
    let mut blocks = Vec::new();
    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        flatten_into(parsed, &mut blocks);
    }
    blocks
}

fn flatten_into(value: Value, blocks: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, blocks);
            }
        }
        Value::Object(ref obj) => {
            if let Some(graph) = obj.get("@graph").cloned() {
                flatten_into(graph, blocks);
            }
            blocks.push(value);
        }
        _ => {}
    }
}

fn candidates_from_block(block: &Value, record: &PageRecord) -> Vec<Candidate> {
    let mut out = Vec::new();

    // Contact
    let mut contact = Contact::default();
    if let Some(tel) = str_field(block, "telephone") {
        contact.phone = Some(tel.trim().to_string());
    }
    if let Some(email) = str_field(block, "email") {
        contact.email = Some(email.trim().trim_start_matches("mailto:").to_string());
    }
    if let Some(url) = str_field(block, "url") {
        contact.website = Some(url.trim().to_string());
    }
    for same_as in list_field(block, "sameAs") {
        if let Some(s) = same_as.as_str() {
            contact.social.push(s.trim().to_string());
        }
    }
    if !contact.is_empty() {
        out.push(candidate(record, FieldName::Contact, FactValue::Contact(contact)));
    }

    // Opening hours
    let hours = parse_hours_spec(&list_field(block, "openingHoursSpecification"));
    if !hours.is_empty() {
        out.push(candidate(record, FieldName::Hours, FactValue::Hours(hours)));
    }

    // Description
    if let Some(desc) = str_field(block, "description") {
        let trimmed = desc.trim();
        if trimmed.len() >= 30 {
            out.push(candidate(record, FieldName::Description, FactValue::Text(trimmed.to_string())));
        }
    }

    // Price range ("$$", "££", etc.)
    if let Some(pr) = str_field(block, "priceRange") {
        let trimmed = pr.trim();
        if !trimmed.is_empty() {
            out.push(candidate(record, FieldName::PriceRange, FactValue::Text(trimmed.to_string())));
        }
    }

    // Menu URL
    let menu = block.get("hasMenu").or_else(|| block.get("menu"));
    if let Some(menu_url) = menu.and_then(menu_url_of) {
        out.push(candidate(record, FieldName::MenuUrl, FactValue::Text(menu_url)));
    }

    // Amenities
    let amenities = parse_amenities(&list_field(block, "amenityFeature"));
    if !amenities.is_empty() {
        out.push(candidate(record, FieldName::Amenities, FactValue::List(amenities)));
    }

    // Offers → fees; an explicit zero price marks fees as not applicable.
    let offers = block.get("offers").or_else(|| block.get("aggregateOffer"));
    if let Some(offers) = offers {
        match parse_offers(offers) {
            OffersOutcome::Fees(text) => {
                out.push(candidate(record, FieldName::Fees, FactValue::Text(text)))
            }
            OffersOutcome::Free => {
                out.push(candidate(record, FieldName::Fees, FactValue::NotApplicable))
            }
            OffersOutcome::None => {}
        }
    }

    // Postal address, kept as free-form JSON.
    if let Some(address) = block.get("address") {
        if address.is_object() {
            out.push(candidate(record, FieldName::Address, FactValue::Json(address.clone())));
        }
    }

    out
}

fn str_field<'a>(block: &'a Value, key: &str) -> Option<&'a str> {
    block.get(key).and_then(Value::as_str)
}

fn list_field(block: &Value, key: &str) -> Vec<Value> {
    match block.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}

fn menu_url_of(menu: &Value) -> Option<String> {
    match menu {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => obj
            .get("url")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string()),
        _ => None,
    }
}

fn parse_hours_spec(specs: &[Value]) -> HoursMap {
    let mut hours = HoursMap::default();
    for spec in specs {
        let Some(obj) = spec.as_object() else {
            continue;
        };
        let opens = obj
            .get("opens")
            .and_then(Value::as_str)
            .and_then(normalize_time);
        let closes = obj
            .get("closes")
            .and_then(Value::as_str)
            .and_then(normalize_time);
        let (Some(open), Some(close)) = (opens, closes) else {
            continue;
        };
        for day_value in list_field(spec, "dayOfWeek") {
            if let Some(day) = day_of(&day_value) {
                hours.add_range(day, open.clone(), close.clone());
            }
        }
    }
    hours
}

fn day_of(value: &Value) -> Option<Day> {
    match value {
        Value::String(s) => Day::from_token(s),
        Value::Object(obj) => obj.get("name").and_then(Value::as_str).and_then(Day::from_token),
        _ => None,
    }
}

fn parse_amenities(features: &[Value]) -> Vec<String> {
    let mut names = Vec::new();
    for feature in features {
        let Some(obj) = feature.as_object() else {
            continue;
        };
        // LocationFeatureSpecification with value=false means "does not
        // have"; skip those.
        if matches!(obj.get("value"), Some(Value::Bool(false))) {
            continue;
        }
        let name = obj
            .get("name")
            .or_else(|| obj.get("propertyID"))
            .and_then(Value::as_str)
            .map(str::trim);
        if let Some(name) = name {
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

enum OffersOutcome {
    Fees(String),
    Free,
    None,
}

fn parse_offers(offers: &Value) -> OffersOutcome {
    let items = match offers {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };

    let mut parts: Vec<String> = Vec::new();
    let mut saw_free = false;
    for offer in items {
        let Some(obj) = offer.as_object() else {
            continue;
        };
        let price = obj
            .get("price")
            .or_else(|| obj.get("lowPrice"))
            .or_else(|| obj.get("priceSpecification").and_then(|ps| ps.get("price")));
        let Some(price) = price else {
            continue;
        };
        let price_str = match price {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if price_str == "0" || price_str == "0.00" || price_str.eq_ignore_ascii_case("free") {
            saw_free = true;
            continue;
        }
        let currency = obj
            .get("priceCurrency")
            .and_then(Value::as_str)
            .unwrap_or("");
        let label = obj
            .get("category")
            .or_else(|| obj.get("name"))
            .and_then(Value::as_str);
        let fragment = match label {
            Some(label) => format!("{label}: {currency} {price_str}"),
            None => format!("{currency} {price_str}"),
        };
        parts.push(fragment.trim().to_string());
    }

    if !parts.is_empty() {
        OffersOutcome::Fees(parts.join("; "))
    } else if saw_free {
        OffersOutcome::Free
    } else {
        OffersOutcome::None
    }
}

fn meta_description(document: &Html) -> Option<String> {
    for selector in [
        r#"meta[name="description"]"#,
        r#"meta[property="og:description"]"#,
    ] {
        let sel = Selector::parse(selector).expect("meta selector");
        if let Some(el) = document.select(&sel).next() {
            if let Some(content) = el.value().attr("content") {
                let trimmed = content.trim();
                if trimmed.len() >= 30 {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::error::PageReason;
    use crate::page::{DiscoveryMethod, PageType};

    use super::*;

    fn record(page_type: PageType) -> PageRecord {
        PageRecord {
            url: "https://v.example/".to_string(),
            page_type,
            fetched_at: Utc::now(),
            valid_until: None,
            http_status: 200,
            content_type: Some("text/html".to_string()),
            content_hash: None,
            cleaned_text: Some("text".to_string()),
            discovered_via: DiscoveryMethod::DirectUrl,
            redirect_chain: Vec::new(),
            reason: PageReason::Ok,
            size_bytes: 0,
            total_ms: 0,
            first_byte_ms: 0,
        }
    }

    fn wrap_jsonld(json: &str) -> String {
        format!(r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#)
    }

    #[test]
    fn restaurant_block_yields_hours_and_contact() {
        let html = wrap_jsonld(
            r#"{
              "@type": "Restaurant",
              "telephone": "+44 20 1234 5678",
              "url": "https://v.example",
              "priceRange": "$$",
              "openingHoursSpecification": [{
                "@type": "OpeningHoursSpecification",
                "dayOfWeek": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"],
                "opens": "09:00",
                "closes": "17:00"
              }]
            }"#,
        );
        let cands = extract(&html, &record(PageType::Homepage));

        let hours = cands
            .iter()
            .find(|c| c.field == FieldName::Hours)
            .expect("hours candidate");
        let FactValue::Hours(h) = &hours.value else {
            panic!("expected hours value");
        };
        assert_eq!(h.0.len(), 5);
        assert_eq!(h.0[&Day::Fri], vec![("09:00".to_string(), "17:00".to_string())]);

        let contact = cands
            .iter()
            .find(|c| c.field == FieldName::Contact)
            .expect("contact candidate");
        let FactValue::Contact(c) = &contact.value else {
            panic!("expected contact value");
        };
        assert_eq!(c.phone.as_deref(), Some("+44 20 1234 5678"));
        assert!(cands.iter().any(|c| c.field == FieldName::PriceRange));
        assert!(cands.iter().all(|c| c.structured));
    }

    #[test]
    fn graph_container_is_flattened() {
        let html = wrap_jsonld(
            r#"{"@graph": [{"@type": "Cafe", "telephone": "+1 555 0100"}]}"#,
        );
        let cands = extract(&html, &record(PageType::Homepage));
        assert!(cands.iter().any(|c| c.field == FieldName::Contact));
    }

    #[test]
    fn free_offers_mark_fees_not_applicable() {
        let html = wrap_jsonld(
            r#"{"@type": "Museum", "offers": {"price": "0", "priceCurrency": "GBP"}}"#,
        );
        let cands = extract(&html, &record(PageType::Homepage));
        let fees = cands.iter().find(|c| c.field == FieldName::Fees).unwrap();
        assert_eq!(fees.value, FactValue::NotApplicable);
    }

    #[test]
    fn priced_offers_become_fees_text() {
        let html = wrap_jsonld(
            r#"{"@type": "Museum", "offers": [
                {"category": "Adults", "price": "12", "priceCurrency": "GBP"},
                {"category": "Children", "price": "6", "priceCurrency": "GBP"}
            ]}"#,
        );
        let cands = extract(&html, &record(PageType::Fees));
        let fees = cands.iter().find(|c| c.field == FieldName::Fees).unwrap();
        assert_eq!(
            fees.value,
            FactValue::Text("Adults: GBP 12; Children: GBP 6".to_string())
        );
    }

    #[test]
    fn meta_description_is_a_candidate() {
        let html = r#"<html><head>
            <meta name="description" content="A family-run trattoria serving handmade pasta since 1973.">
        </head><body></body></html>"#;
        let cands = extract(html, &record(PageType::Homepage));
        assert!(cands
            .iter()
            .any(|c| c.field == FieldName::Description && c.structured));
    }

    #[test]
    fn malformed_jsonld_is_ignored() {
        let html = wrap_jsonld(r#"{"@type": "Restaurant", "telephone": "#);
        assert!(extract(&html, &record(PageType::Homepage)).is_empty());
    }

    #[test]
    fn amenity_features_skip_negated_values() {
        let html = wrap_jsonld(
            r#"{"@type": "Hotel", "amenityFeature": [
                {"name": "Free WiFi", "value": true},
                {"name": "Parking", "value": false}
            ]}"#,
        );
        let cands = extract(&html, &record(PageType::Homepage));
        let amenities = cands.iter().find(|c| c.field == FieldName::Amenities).unwrap();
        assert_eq!(amenities.value, FactValue::List(vec!["Free WiFi".to_string()]));
    }
}
