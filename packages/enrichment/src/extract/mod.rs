//! Fact extraction: structured-data and heuristic paths producing
//! per-field candidates with source URLs, merged by [`unify`].

pub mod heuristics;
pub mod hours;
pub mod schema_org;
pub mod unify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::page::{CrawlPage, PageType};
use hours::HoursMap;

pub use unify::{unify, EnrichmentUpdate};

/// Enrichment field names; stable strings used for freshness timestamps and
/// the per-field sources map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldName {
    Hours,
    Contact,
    Description,
    Features,
    MenuUrl,
    MenuItems,
    PriceRange,
    Amenities,
    Fees,
    Address,
}

impl FieldName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::Hours => "hours",
            FieldName::Contact => "contact",
            FieldName::Description => "description",
            FieldName::Features => "features",
            FieldName::MenuUrl => "menu_url",
            FieldName::MenuItems => "menu_items",
            FieldName::PriceRange => "price_range",
            FieldName::Amenities => "amenities",
            FieldName::Fees => "fees",
            FieldName::Address => "address",
        }
    }

    /// The dedicated target page type for this field, if any. Facts found
    /// on their dedicated page outrank every other source.
    pub fn dedicated_page(&self) -> Option<PageType> {
        Some(match self {
            FieldName::Hours => PageType::Hours,
            FieldName::Contact => PageType::Contact,
            FieldName::MenuUrl | FieldName::MenuItems | FieldName::PriceRange => PageType::Menu,
            FieldName::Fees => PageType::Fees,
            FieldName::Description | FieldName::Features => PageType::About,
            FieldName::Amenities | FieldName::Address => return None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub social: Vec<String>,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.website.is_none() && self.social.is_empty()
    }

    /// Fill holes from a lower-ranked source without clobbering.
    pub fn fill_missing(&mut self, other: &Contact) -> bool {
        let mut changed = false;
        if self.phone.is_none() && other.phone.is_some() {
            self.phone = other.phone.clone();
            changed = true;
        }
        if self.email.is_none() && other.email.is_some() {
            self.email = other.email.clone();
            changed = true;
        }
        if self.website.is_none() && other.website.is_some() {
            self.website = other.website.clone();
            changed = true;
        }
        for s in &other.social {
            if !self.social.contains(s) {
                self.social.push(s.clone());
                changed = true;
            }
        }
        changed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

/// A candidate value for one field, traced to the page it came from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub field: FieldName,
    pub value: FactValue,
    pub source_url: String,
    pub page_type: PageType,
    /// True when parsed from structured data (JSON-LD) rather than free
    /// text.
    pub structured: bool,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Hours(HoursMap),
    Contact(Contact),
    Text(String),
    List(Vec<String>),
    MenuItems(Vec<MenuItem>),
    Json(serde_json::Value),
    /// The source states the field does not apply (e.g. free admission).
    NotApplicable,
}

/// Run both extraction paths over every gate-passing page of a crawl.
pub fn extract_facts(pages: &[CrawlPage]) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for page in pages {
        if !page.record.passed_gate() {
            continue;
        }
        if let Some(html) = &page.html {
            candidates.extend(schema_org::extract(html, &page.record));
        }
        if let Some(text) = &page.record.cleaned_text {
            candidates.extend(heuristics::extract(text, &page.record));
        }
    }
    candidates
}
