use crate::crawler::{FailureClass, PageKind};
use crate::identity::Identity;
use crate::proxy::ProxyRecord;
use crate::site::ListingItem;
use chrono::{DateTime, Utc};

/// What an attempt is fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// One page of the site's listing, 1-based
    Listing { page: u32 },
    /// The detail page of an ad discovered on a listing page
    Detail(ListingItem),
}

impl FetchTarget {
    pub fn kind(&self) -> PageKind {
        match self {
            FetchTarget::Listing { .. } => PageKind::Listing,
            FetchTarget::Detail(_) => PageKind::Detail,
        }
    }
}

/// One logical fetch across all of its retries
///
/// `count` is the 1-based number of the try currently scheduled or in flight.
/// The identity is replaced on every retry; the proxy is leased at dispatch and
/// cleared when it is blacklisted or released.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub url: String,
    pub target: FetchTarget,
    pub count: u32,
    pub identity: Identity,
    pub proxy: Option<ProxyRecord>,
    pub last_failure: Option<FailureClass>,
    pub created_at: DateTime<Utc>,
}

impl FetchAttempt {
    pub fn new(url: String, target: FetchTarget, identity: Identity) -> Self {
        Self {
            url,
            target,
            count: 1,
            identity,
            proxy: None,
            last_failure: None,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> PageKind {
        self.target.kind()
    }

    /// Listing page number, if this attempt fetches a listing page
    pub fn listing_page(&self) -> Option<u32> {
        match self.target {
            FetchTarget::Listing { page } => Some(page),
            FetchTarget::Detail(_) => None,
        }
    }
}
