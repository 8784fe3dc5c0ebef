//! Site extractors
//!
//! A [`Site`] knows how to address a listing site's pages, how its detail pages
//! prove they are genuine and how to turn page bodies into [`ExtractedRecord`]s.
//! The crawl engine is otherwise site-agnostic.

pub mod codes;
mod dubizzle;
pub mod fields;
mod record;
mod syarah;

pub use dubizzle::Dubizzle;
pub use record::{
    CoreListing, DubizzleDetail, ExtractedRecord, ListingItem, ListingPage, SiteDetail,
    SyarahDetail,
};
pub use syarah::Syarah;

use crate::config::SiteKind;
use crate::crawler::{PageKind, StubMarkers};
use crate::{ConfigError, SweepError};
use reqwest::header::HeaderMap;
use scraper::Selector;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors raised while extracting data from a page
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The page is genuine but holds nothing worth storing; the item is dropped
    #[error("Unusable record: {0}")]
    Unusable(String),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("Malformed page: {0}")]
    Malformed(String),
}

/// Compiles a CSS selector
pub(crate) fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{}: {}", css, e)))
}

/// A classified-ad site the crawler can harvest
pub trait Site: Send + Sync {
    /// Short lowercase name used in logs and run records
    fn name(&self) -> &'static str;

    /// Value stored in the `website` column
    fn website(&self) -> &'static str;

    /// URL of a 1-based listing page
    fn listing_url(&self, page: u32) -> String;

    /// Extracts the ads on a listing page
    ///
    /// # Arguments
    ///
    /// * `page` - Page number the body belongs to
    /// * `url` - Final URL of the page, used to resolve relative links
    /// * `body` - Response body
    fn parse_listing(&self, page: u32, url: &str, body: &str) -> Result<ListingPage, ExtractError>;

    /// Extracts a record from a detail page already classified as valid
    fn parse_detail(
        &self,
        item: &ListingItem,
        final_url: &str,
        body: &str,
    ) -> Result<ExtractedRecord, ExtractError>;

    /// Content genuine detail pages carry, `None` if the site never serves stubs
    fn stub_markers(&self) -> Option<StubMarkers>;

    /// Listing URL with a `{page}` placeholder used for referers
    fn referer_template(&self) -> Option<String>;

    /// Extra headers the site expects on every request of the given kind
    fn request_headers(&self, kind: PageKind) -> HeaderMap;
}

/// Builds the extractor for a configured site
///
/// # Arguments
///
/// * `kind` - Which site to build
/// * `base_url` - Overrides the site's public origin when set
pub fn build_site(kind: SiteKind, base_url: Option<&str>) -> Result<Arc<dyn Site>, SweepError> {
    let base = match base_url {
        Some(raw) => Some(
            Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(format!("'{}': {}", raw, e)))?,
        ),
        None => None,
    };

    let site: Arc<dyn Site> = match kind {
        SiteKind::Dubizzle => Arc::new(Dubizzle::new(base)),
        SiteKind::Syarah => Arc::new(Syarah::new(base)),
    };
    Ok(site)
}

/// Origin of `base` without a trailing slash
pub(crate) fn origin_of(base: &Url) -> String {
    base.as_str().trim_end_matches('/').to_string()
}
