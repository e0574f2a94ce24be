//! Deadline-bounded site crawling and fact extraction for venue
//! enrichment.
//!
//! The crate is pure with respect to storage: the server feeds it venue
//! URLs and persists the [`page::CrawlOutcome`] and
//! [`extract::EnrichmentUpdate`] it returns. Concurrency discipline lives
//! in [`gate::RateGate`]; wall-clock discipline in [`deadline::Deadline`].

pub mod clean;
pub mod deadline;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod extract;
pub mod gate;
pub mod links;
pub mod page;
pub mod pipeline;
pub mod recovery;
pub mod robots;
pub mod testing;

pub use deadline::Deadline;
pub use downloader::{Downloader, DownloaderConfig, Fetcher};
pub use error::{PageReason, UnknownCode};
pub use extract::{extract_facts, unify, EnrichmentUpdate};
pub use gate::{RateGate, RateGateConfig};
pub use page::{CrawlOutcome, CrawlPage, DiscoveryMethod, PageRecord, PageType};
pub use pipeline::{CrawlPipeline, PipelineConfig};
pub use recovery::{derive_candidates, RecoveryCandidate, RecoveryMethod};
