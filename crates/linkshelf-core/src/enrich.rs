//! Metadata enrichment seam.
//!
//! Fetching is best-effort: a fetcher may fail for any reason and the
//! caller degrades to "no enrichment". Fetched values only ever fill empty
//! fields.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EnrichmentError;
use crate::merge::is_present;

/// Metadata scraped from a page. Empty strings mean "not found".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    pub favicon_url: String,
}

impl PageMetadata {
    pub fn is_empty(&self) -> bool {
        !is_present(&self.title) && !is_present(&self.description) && !is_present(&self.favicon_url)
    }
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch page metadata, giving up after `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageMetadata, EnrichmentError>;
}

/// Fill each empty slot from `meta`. Returns `true` if anything was filled.
pub fn fill_missing(
    title: &mut String,
    description: &mut String,
    favicon_url: &mut String,
    meta: &PageMetadata,
) -> bool {
    let mut changed = false;
    for (slot, value) in [
        (title, &meta.title),
        (description, &meta.description),
        (favicon_url, &meta.favicon_url),
    ] {
        if !is_present(slot) && is_present(value) {
            *slot = value.trim().to_string();
            changed = true;
        }
    }
    changed
}
