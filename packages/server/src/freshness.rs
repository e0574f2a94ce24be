//! Per-field freshness evaluation.
//!
//! Which fields a venue *requires* depends on its category group; how old
//! a field may get depends on the field. A venue with any required field
//! missing or stale is eligible for a realtime crawl on query, and for
//! background refresh by the scheduler.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::store::{EnrichmentRow, Venue};

#[derive(Debug, Clone, Copy)]
pub struct FreshnessWindows {
    pub hours_days: i64,
    pub menu_contact_price_days: i64,
    pub desc_features_days: i64,
}

impl FreshnessWindows {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hours_days: config.fresh_hours_days,
            menu_contact_price_days: config.fresh_menu_contact_price_days,
            desc_features_days: config.fresh_desc_features_days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryGroup {
    Restaurant,
    Accommodation,
    Attraction,
    General,
}

/// Map a free-text category name onto the group that decides required
/// fields.
pub fn categorize(category_name: Option<&str>) -> CategoryGroup {
    let Some(name) = category_name else {
        return CategoryGroup::General;
    };
    let c = name.to_lowercase();
    if ["restaurant", "café", "cafe", "bar", "pub", "diner", "bistro", "pizzeria", "coffee", "bakery"]
        .iter()
        .any(|k| c.contains(k))
    {
        CategoryGroup::Restaurant
    } else if ["hotel", "hostel", "motel", "guesthouse", "guest house", "b&b", "bnb", "lodge", "resort", "campground"]
        .iter()
        .any(|k| c.contains(k))
    {
        CategoryGroup::Accommodation
    } else if ["museum", "gallery", "attraction", "landmark", "monument", "zoo", "aquarium", "park", "castle", "cathedral"]
        .iter()
        .any(|k| c.contains(k))
    {
        CategoryGroup::Attraction
    } else {
        CategoryGroup::General
    }
}

fn required_fields(group: CategoryGroup) -> Vec<&'static str> {
    let mut fields = vec!["hours", "contact", "description"];
    match group {
        CategoryGroup::Restaurant => fields.extend(["menu", "price_range"]),
        CategoryGroup::Accommodation => fields.extend(["price_range", "amenities"]),
        CategoryGroup::Attraction => fields.extend(["features", "fees"]),
        CategoryGroup::General => {}
    }
    fields
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FreshnessReport {
    pub missing: Vec<&'static str>,
    pub stale: Vec<&'static str>,
    pub fresh: Vec<&'static str>,
}

impl FreshnessReport {
    pub fn needs_refresh(&self) -> bool {
        !self.missing.is_empty() || !self.stale.is_empty()
    }
}

struct FieldStatus {
    present: bool,
    last_updated: Option<DateTime<Utc>>,
    window_days: i64,
}

pub fn compute_freshness(
    enrichment: Option<&EnrichmentRow>,
    category_name: Option<&str>,
    windows: FreshnessWindows,
) -> FreshnessReport {
    let group = categorize(category_name);
    let now = Utc::now();
    let mut report = FreshnessReport::default();

    for field in required_fields(group) {
        let status = field_status(field, enrichment, windows);
        if !status.present {
            report.missing.push(field);
        } else {
            let stale = match status.last_updated {
                None => true,
                Some(ts) => ts < now - Duration::days(status.window_days),
            };
            if stale {
                report.stale.push(field);
            } else {
                report.fresh.push(field);
            }
        }
    }
    report
}

fn field_status(
    field: &str,
    enrichment: Option<&EnrichmentRow>,
    windows: FreshnessWindows,
) -> FieldStatus {
    let Some(e) = enrichment else {
        return FieldStatus {
            present: false,
            last_updated: None,
            window_days: windows.desc_features_days,
        };
    };
    match field {
        "hours" => FieldStatus {
            present: e.hours.is_some(),
            last_updated: e.hours_last_updated,
            window_days: windows.hours_days,
        },
        "contact" => FieldStatus {
            present: e.contact.is_some(),
            last_updated: e.contact_last_updated,
            window_days: windows.menu_contact_price_days,
        },
        "description" => FieldStatus {
            present: e.description.is_some(),
            last_updated: e.description_last_updated,
            window_days: windows.desc_features_days,
        },
        "features" => FieldStatus {
            present: e.features.is_some(),
            last_updated: e.features_last_updated,
            window_days: windows.desc_features_days,
        },
        "menu" => FieldStatus {
            present: e.menu_url.is_some() || e.menu_items.is_some(),
            last_updated: e.menu_last_updated,
            window_days: windows.menu_contact_price_days,
        },
        "price_range" => FieldStatus {
            present: e.price_range.is_some(),
            last_updated: e.price_last_updated,
            window_days: windows.menu_contact_price_days,
        },
        "amenities" => FieldStatus {
            present: e.amenities.is_some(),
            last_updated: e.amenities_last_updated,
            window_days: windows.desc_features_days,
        },
        // Explicit not-applicable counts as present: the source said there
        // is nothing to charge.
        "fees" => FieldStatus {
            present: e.fees.is_some() || e.fees_not_applicable,
            last_updated: e.fees_last_updated,
            window_days: windows.menu_contact_price_days,
        },
        _ => FieldStatus {
            present: false,
            last_updated: None,
            window_days: windows.desc_features_days,
        },
    }
}

/// Whether a user query should enqueue a realtime crawl for this venue.
/// Venues without a website never trigger (there is nothing to crawl).
pub fn should_trigger_realtime(
    venue: &Venue,
    enrichment: Option<&EnrichmentRow>,
    windows: FreshnessWindows,
) -> (bool, FreshnessReport) {
    let report = compute_freshness(enrichment, venue.category_name.as_deref(), windows);
    let has_website = venue.website.as_deref().map(|w| !w.is_empty()).unwrap_or(false);
    let trigger = has_website && (enrichment.is_none() || report.needs_refresh());
    (trigger, report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn windows() -> FreshnessWindows {
        FreshnessWindows {
            hours_days: 3,
            menu_contact_price_days: 14,
            desc_features_days: 30,
        }
    }

    fn venue(category: &str, website: Option<&str>) -> Venue {
        Venue {
            venue_id: "v1".to_string(),
            name: "Test venue".to_string(),
            category_name: Some(category.to_string()),
            latitude: 51.5,
            longitude: -0.12,
            website: website.map(str::to_string),
            email: None,
            phone: None,
            popularity: Some(0.5),
            last_enriched_at: None,
        }
    }

    fn row_with_hours(age_days: i64) -> EnrichmentRow {
        let ts = Utc::now() - Duration::days(age_days);
        EnrichmentRow {
            venue_id: "v1".to_string(),
            hours: Some(json!({"mon": [["09:00", "17:00"]]})),
            hours_last_updated: Some(ts),
            contact: Some(json!({"phone": "+44"})),
            contact_last_updated: Some(ts),
            description: Some("desc".to_string()),
            description_last_updated: Some(ts),
            features: None,
            features_last_updated: None,
            menu_url: None,
            menu_items: None,
            menu_last_updated: None,
            price_range: None,
            price_last_updated: None,
            amenities: None,
            amenities_last_updated: None,
            fees: None,
            fees_not_applicable: false,
            fees_last_updated: None,
            address_components: None,
            sources: json!({}),
        }
    }

    #[test]
    fn categorize_groups() {
        assert_eq!(categorize(Some("Italian Restaurant")), CategoryGroup::Restaurant);
        assert_eq!(categorize(Some("Boutique Hotel")), CategoryGroup::Accommodation);
        assert_eq!(categorize(Some("Natural History Museum")), CategoryGroup::Attraction);
        assert_eq!(categorize(Some("Hardware Store")), CategoryGroup::General);
        assert_eq!(categorize(None), CategoryGroup::General);
    }

    #[test]
    fn fresh_hours_within_window() {
        let row = row_with_hours(1);
        let report = compute_freshness(Some(&row), Some("cafe"), windows());
        assert!(report.fresh.contains(&"hours"));
        assert!(!report.stale.contains(&"hours"));
    }

    #[test]
    fn hours_stale_after_window() {
        let row = row_with_hours(4);
        let report = compute_freshness(Some(&row), Some("cafe"), windows());
        assert!(report.stale.contains(&"hours"));
    }

    #[test]
    fn restaurant_requires_menu_and_price() {
        let row = row_with_hours(1);
        let report = compute_freshness(Some(&row), Some("restaurant"), windows());
        assert!(report.missing.contains(&"menu"));
        assert!(report.missing.contains(&"price_range"));
    }

    #[test]
    fn missing_enrichment_row_triggers() {
        let v = venue("cafe", Some("https://v.example"));
        let (trigger, report) = should_trigger_realtime(&v, None, windows());
        assert!(trigger);
        assert_eq!(report.missing.len(), 3);
    }

    #[test]
    fn no_website_never_triggers() {
        let v = venue("cafe", None);
        let (trigger, _) = should_trigger_realtime(&v, None, windows());
        assert!(!trigger);
    }

    #[test]
    fn fees_not_applicable_counts_as_present() {
        let mut row = row_with_hours(1);
        row.fees_not_applicable = true;
        row.fees_last_updated = Some(Utc::now());
        let report = compute_freshness(Some(&row), Some("museum"), windows());
        assert!(!report.missing.contains(&"fees"));
        assert!(report.fresh.contains(&"fees"));
    }
}
