//! Merge extracted candidates into a single per-venue update.
//!
//! Precedence per field: dedicated target page > structured data on any
//! page > homepage/about free text. Ties break by most recent fetch.
//! Hours contradictions resolve to the more restrictive schedule; other
//! fields keep the first-encountered value. Every populated field carries
//! the URLs of its contributing pages.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::page::PageType;

use super::hours::HoursMap;
use super::{Candidate, Contact, FactValue, FieldName, MenuItem};

/// Partial update for a venue's enrichment row. `None` fields are left
/// untouched by the store; updates never clobber what they did not see.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentUpdate {
    pub hours: Option<HoursMap>,
    pub contact: Option<Contact>,
    pub description: Option<String>,
    pub features: Option<Vec<String>>,
    pub menu_url: Option<String>,
    pub menu_items: Option<Vec<MenuItem>>,
    pub price_range: Option<String>,
    pub amenities: Option<Vec<String>>,
    pub fees: Option<String>,
    /// Source explicitly stated there is nothing to charge (free entry).
    pub fees_not_applicable: bool,
    pub address_components: Option<serde_json::Value>,
    /// field name -> contributing page URLs, deduplicated, order-preserved.
    pub sources: BTreeMap<String, Vec<String>>,
}

impl EnrichmentUpdate {
    pub fn is_empty(&self) -> bool {
        self.updated_fields().is_empty()
    }

    /// Names of the fields this update touches.
    pub fn updated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.hours.is_some() {
            fields.push("hours");
        }
        if self.contact.is_some() {
            fields.push("contact");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.features.is_some() {
            fields.push("features");
        }
        if self.menu_url.is_some() {
            fields.push("menu_url");
        }
        if self.menu_items.is_some() {
            fields.push("menu_items");
        }
        if self.price_range.is_some() {
            fields.push("price_range");
        }
        if self.amenities.is_some() {
            fields.push("amenities");
        }
        if self.fees.is_some() || self.fees_not_applicable {
            fields.push("fees");
        }
        if self.address_components.is_some() {
            fields.push("address");
        }
        fields
    }

    fn cite(&mut self, field: FieldName, url: &str) {
        let urls = self.sources.entry(field.as_str().to_string()).or_default();
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
}

/// Precedence rank; lower is stronger.
fn rank(c: &Candidate) -> u8 {
    if c.field.dedicated_page() == Some(c.page_type) {
        0
    } else if c.structured {
        1
    } else if matches!(c.page_type, PageType::Homepage | PageType::About) {
        2
    } else {
        3
    }
}

pub fn unify(candidates: &[Candidate]) -> EnrichmentUpdate {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then(b.fetched_at.cmp(&a.fetched_at))
    });

    let mut update = EnrichmentUpdate::default();

    for c in &ordered {
        match (&c.field, &c.value) {
            (FieldName::Hours, FactValue::Hours(h)) => {
                match update.hours.as_mut() {
                    None => {
                        update.hours = Some(h.clone());
                        update.cite(FieldName::Hours, &c.source_url);
                    }
                    Some(existing) => {
                        // A same-rank contradiction narrows to the overlap;
                        // a weaker source only fills missing days.
                        let best_rank = best_rank_of(&ordered, FieldName::Hours);
                        if rank(c) == best_rank {
                            if reconcile_hours(existing, h) {
                                update.cite(FieldName::Hours, &c.source_url);
                            }
                        } else if fill_missing_days(existing, h) {
                            update.cite(FieldName::Hours, &c.source_url);
                        }
                    }
                }
            }
            (FieldName::Contact, FactValue::Contact(contact)) => match update.contact.as_mut() {
                None => {
                    update.contact = Some(contact.clone());
                    update.cite(FieldName::Contact, &c.source_url);
                }
                Some(existing) => {
                    if existing.fill_missing(contact) {
                        update.cite(FieldName::Contact, &c.source_url);
                    }
                }
            },
            (FieldName::Features, FactValue::List(list)) => {
                if union_into(update.features.get_or_insert_with(Vec::new), list) {
                    update.cite(FieldName::Features, &c.source_url);
                }
            }
            (FieldName::Amenities, FactValue::List(list)) => {
                if union_into(update.amenities.get_or_insert_with(Vec::new), list) {
                    update.cite(FieldName::Amenities, &c.source_url);
                }
            }
            (FieldName::Description, FactValue::Text(text)) => {
                if update.description.is_none() {
                    update.description = Some(text.clone());
                    update.cite(FieldName::Description, &c.source_url);
                }
            }
            (FieldName::MenuUrl, FactValue::Text(url)) => {
                if update.menu_url.is_none() {
                    update.menu_url = Some(url.clone());
                    update.cite(FieldName::MenuUrl, &c.source_url);
                }
            }
            (FieldName::MenuItems, FactValue::MenuItems(items)) => {
                if update.menu_items.is_none() {
                    update.menu_items = Some(items.clone());
                    update.cite(FieldName::MenuItems, &c.source_url);
                }
            }
            (FieldName::PriceRange, FactValue::Text(text)) => {
                if update.price_range.is_none() {
                    update.price_range = Some(text.clone());
                    update.cite(FieldName::PriceRange, &c.source_url);
                }
            }
            (FieldName::Fees, FactValue::Text(text)) => {
                if update.fees.is_none() && !update.fees_not_applicable {
                    update.fees = Some(text.clone());
                    update.cite(FieldName::Fees, &c.source_url);
                }
            }
            (FieldName::Fees, FactValue::NotApplicable) => {
                if update.fees.is_none() && !update.fees_not_applicable {
                    update.fees_not_applicable = true;
                    update.cite(FieldName::Fees, &c.source_url);
                }
            }
            (FieldName::Address, FactValue::Json(value)) => {
                if update.address_components.is_none() {
                    update.address_components = Some(value.clone());
                    update.cite(FieldName::Address, &c.source_url);
                }
            }
            _ => {}
        }
    }

    // Empty unions collapse back to "untouched".
    if matches!(&update.features, Some(v) if v.is_empty()) {
        update.features = None;
    }
    if matches!(&update.amenities, Some(v) if v.is_empty()) {
        update.amenities = None;
    }

    update
}

fn best_rank_of(ordered: &[&Candidate], field: FieldName) -> u8 {
    ordered
        .iter()
        .filter(|c| c.field == field)
        .map(|c| rank(c))
        .min()
        .unwrap_or(u8::MAX)
}

/// Merge a same-rank hours candidate: equal days stay, conflicting days
/// narrow to their overlap (keeping the incumbent when disjoint), new days
/// are added. Returns true if anything changed.
fn reconcile_hours(existing: &mut HoursMap, other: &HoursMap) -> bool {
    let mut changed = false;
    for (day, ranges) in &other.0 {
        match existing.0.get(day) {
            None => {
                existing.0.insert(*day, ranges.clone());
                changed = true;
            }
            Some(current) if current == ranges => {}
            Some(_) => {
                let mut a = HoursMap::default();
                a.0.insert(*day, existing.0[day].clone());
                let mut b = HoursMap::default();
                b.0.insert(*day, ranges.clone());
                let narrowed = a.intersect(&b);
                if let Some(overlap) = narrowed.0.get(day) {
                    existing.0.insert(*day, overlap.clone());
                    changed = true;
                }
            }
        }
    }
    changed
}

fn fill_missing_days(existing: &mut HoursMap, other: &HoursMap) -> bool {
    let mut changed = false;
    for (day, ranges) in &other.0 {
        if !existing.0.contains_key(day) {
            existing.0.insert(*day, ranges.clone());
            changed = true;
        }
    }
    changed
}

fn union_into(existing: &mut Vec<String>, additions: &[String]) -> bool {
    let mut changed = false;
    for item in additions {
        if !existing.iter().any(|e| e == item) {
            existing.push(item.clone());
            changed = true;
        }
    }
    changed
}
