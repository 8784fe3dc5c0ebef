//! Session state for one crawl
//!
//! Owns the seen-ID set, the listing page cursor and the consecutive-empty-page
//! counter. [`CrawlSessionState::record_page`] is the only place the seen set
//! and the counter change, which keeps the stop decision in one spot.

use crate::config::{CrawlMode, CrawlerConfig};
use crate::site::{ListingItem, ListingPage};
use crate::url::normalize_url;
use std::collections::HashSet;
use std::fmt;

/// Why a session stopped paginating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Consecutive listing pages without a new ad reached the threshold
    CircuitBreaker,
    /// `max-pages` listing pages were walked
    PageLimit,
    /// The site has no further listing pages
    ListingExhausted,
    /// The run was cancelled from outside
    Cancelled,
    /// Nothing completed successfully for the stall timeout
    Stalled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::CircuitBreaker => "circuit_breaker",
            StopReason::PageLimit => "page_limit",
            StopReason::ListingExhausted => "listing_exhausted",
            StopReason::Cancelled => "cancelled",
            StopReason::Stalled => "stalled",
        }
    }

    /// Returns true if this stop should be reported as a failed run
    pub fn is_error(&self) -> bool {
        matches!(self, StopReason::Stalled)
    }

    /// Returns true if in-flight work is abandoned rather than drained
    pub fn aborts(&self) -> bool {
        matches!(self, StopReason::Cancelled | StopReason::Stalled)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of recording one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageVerdict {
    /// Items not seen before, in page order
    pub new_items: Vec<ListingItem>,
    /// Set when pagination should end after this page
    pub stop: Option<StopReason>,
}

/// Running counters for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTotals {
    pub pages_fetched: u32,
    pub pages_skipped: u32,
    pub items_listed: u64,
    pub new_items: u64,
    pub records_saved: u64,
    pub records_dropped: u64,
    pub details_abandoned: u64,
    pub retries: u64,
}

/// Mutable state of one crawl session
#[derive(Debug)]
pub struct CrawlSessionState {
    mode: CrawlMode,
    empty_page_threshold: u32,
    max_pages: u32,
    seen_ids: HashSet<String>,
    seen_urls: HashSet<String>,
    cursor: u32,
    consecutive_empty: u32,
    pub totals: SessionTotals,
}

impl CrawlSessionState {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self::with_limits(config.mode, config.empty_page_threshold, config.max_pages)
    }

    pub fn with_limits(mode: CrawlMode, empty_page_threshold: u32, max_pages: u32) -> Self {
        Self {
            mode,
            empty_page_threshold: empty_page_threshold.max(1),
            max_pages: max_pages.max(1),
            seen_ids: HashSet::new(),
            seen_urls: HashSet::new(),
            cursor: 0,
            consecutive_empty: 0,
            totals: SessionTotals::default(),
        }
    }

    /// Adds stored ad ids to the seen set
    ///
    /// Only incremental sessions are seeded; a full session revisits every ad.
    ///
    /// # Returns
    ///
    /// The number of ids added
    pub fn seed<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        if self.mode != CrawlMode::Incremental {
            return 0;
        }
        let before = self.seen_ids.len();
        self.seen_ids.extend(ids);
        self.seen_ids.len() - before
    }

    pub fn mode(&self) -> CrawlMode {
        self.mode
    }

    /// Last listing page recorded or skipped
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn next_page(&self) -> u32 {
        self.cursor + 1
    }

    pub fn consecutive_empty(&self) -> u32 {
        self.consecutive_empty
    }

    pub fn seen_count(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn has_seen(&self, ad_id: &str) -> bool {
        self.seen_ids.contains(ad_id)
    }

    /// Records a parsed listing page
    ///
    /// Unseen items are added to the seen set and returned. In incremental mode
    /// a page with nothing new bumps the empty counter and any new item resets
    /// it; the circuit breaker fires when the counter reaches the threshold.
    ///
    /// # Arguments
    ///
    /// * `page` - 1-based page number
    /// * `listing` - Items parsed from the page
    ///
    /// # Returns
    ///
    /// The new items and the reason to stop paginating, if any
    pub fn record_page(&mut self, page: u32, listing: &ListingPage) -> PageVerdict {
        self.cursor = self.cursor.max(page);
        self.totals.pages_fetched += 1;
        self.totals.items_listed += listing.items.len() as u64;

        let mut new_items = Vec::new();
        for item in &listing.items {
            if self.mode == CrawlMode::Full && !self.seen_urls.insert(url_key(&item.url)) {
                continue;
            }
            if self.seen_ids.insert(item.ad_id.clone()) {
                new_items.push(item.clone());
            }
        }
        self.totals.new_items += new_items.len() as u64;

        let stop = if listing.items.is_empty() {
            Some(StopReason::ListingExhausted)
        } else if self.mode == CrawlMode::Incremental && self.bump_counter(new_items.is_empty()) {
            Some(StopReason::CircuitBreaker)
        } else if listing.last_page.is_some_and(|last| page >= last) {
            Some(StopReason::ListingExhausted)
        } else {
            self.page_limit(page)
        };

        PageVerdict { new_items, stop }
    }

    /// Records a listing page abandoned by the retry ceiling
    ///
    /// The empty counter is left alone; only the page limit can stop here.
    pub fn skip_page(&mut self, page: u32) -> Option<StopReason> {
        self.cursor = self.cursor.max(page);
        self.totals.pages_skipped += 1;
        self.page_limit(page)
    }

    fn bump_counter(&mut self, nothing_new: bool) -> bool {
        if nothing_new {
            self.consecutive_empty += 1;
        } else {
            self.consecutive_empty = 0;
        }
        self.consecutive_empty >= self.empty_page_threshold
    }

    fn page_limit(&self, page: u32) -> Option<StopReason> {
        (page >= self.max_pages).then_some(StopReason::PageLimit)
    }
}

fn url_key(raw: &str) -> String {
    normalize_url(raw)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| raw.to_string())
}
