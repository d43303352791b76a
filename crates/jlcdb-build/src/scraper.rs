//! Catalog scraping
//!
//! Walks every (collapsed) category of the upstream catalog page by page,
//! normalizes each entry at the boundary, and streams each page into the
//! components store before the next page is requested — a mid-run failure
//! loses at most the in-flight page, and everything already written stays
//! valid.
//!
//! Page fetching sits behind the [`PageSource`] trait so the scrape loop
//! is testable without a network.

use crate::api::client::RetryPolicy;
use crate::api::types::{collapse_categories, ApiCategory};
use crate::api::JlcClient;
use crate::error::Result;
use crate::model::Component;
use crate::store::ComponentStore;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

/// Items per page; the maximum the API allows
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// The API serves at most 100 pages of 1000 items per query, so any
/// primary category under this total can be fetched without splitting by
/// secondary category
pub const CATEGORY_COLLAPSE_LIMIT: i64 = 100_000;

/// Pacing delay between successive page requests
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(3);

/// Source of catalog pages
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one 1-based page of a category; an empty page terminates the
    /// category
    async fn fetch_page(&self, category: &ApiCategory, page: u32) -> Result<Vec<Value>>;

    /// Fetch the category listing with stock counts
    async fn fetch_categories(&self) -> Result<Vec<ApiCategory>>;
}

/// The production page source backed by [`JlcClient`]
pub struct JlcPageSource {
    client: JlcClient,
    page_size: u32,
    in_stock_only: bool,
}

impl JlcPageSource {
    pub fn new(client: JlcClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
            in_stock_only: true,
        }
    }
}

#[async_trait]
impl PageSource for JlcPageSource {
    async fn fetch_page(&self, category: &ApiCategory, page: u32) -> Result<Vec<Value>> {
        self.client
            .fetch_page(category, page, self.page_size, self.in_stock_only)
            .await
    }

    async fn fetch_categories(&self) -> Result<Vec<ApiCategory>> {
        self.client.fetch_categories(self.in_stock_only).await
    }
}

/// Counters for one scrape run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeStats {
    pub categories: usize,
    pub pages: usize,
    /// Records normalized and upserted
    pub records: usize,
    /// Records skipped because they failed to normalize
    pub skipped: usize,
}

/// Drives a [`PageSource`] and streams the results into the store
pub struct Scraper<S> {
    source: S,
    retry: RetryPolicy,
    page_delay: Duration,
}

impl<S: PageSource> Scraper<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }

    /// Override the per-page retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the pacing delay between page requests
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Scrape the full catalog into `store`.
    ///
    /// Discovers and collapses categories, then scrapes each in turn.
    /// A page that exhausts its retry budget aborts the run; pages already
    /// upserted are not rolled back.
    pub async fn scrape(&self, store: &mut ComponentStore, now: i64) -> Result<ScrapeStats> {
        let listed = self.source.fetch_categories().await?;
        let categories = collapse_categories(&listed, CATEGORY_COLLAPSE_LIMIT);
        info!(
            listed = listed.len(),
            collapsed = categories.len(),
            "discovered categories"
        );

        let mut stats = ScrapeStats::default();
        for category in &categories {
            self.scrape_category(category, store, now, &mut stats)
                .await?;
            stats.categories += 1;
        }
        info!(
            categories = stats.categories,
            pages = stats.pages,
            records = stats.records,
            skipped = stats.skipped,
            "scrape finished"
        );
        Ok(stats)
    }

    /// Scrape one category, upserting page by page
    pub async fn scrape_category(
        &self,
        category: &ApiCategory,
        store: &mut ComponentStore,
        now: i64,
        stats: &mut ScrapeStats,
    ) -> Result<()> {
        let mut page: u32 = 1;
        loop {
            let entries = self
                .retry
                .run("page fetch", || self.source.fetch_page(category, page))
                .await?;
            if entries.is_empty() {
                break;
            }

            let mut components = Vec::with_capacity(entries.len());
            for entry in &entries {
                match Component::from_raw(entry, now) {
                    Ok(component) => components.push(component),
                    Err(err) => {
                        // One malformed record never costs the page.
                        warn!(category = %category, page, error = %err, "skipping record");
                        stats.skipped += 1;
                    }
                }
            }
            store.upsert_batch(&components)?;
            stats.pages += 1;
            stats.records += components.len();
            page += 1;

            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }
        Ok(())
    }
}
