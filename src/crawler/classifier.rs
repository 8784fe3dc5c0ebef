//! Response classification
//!
//! Protected sites answer a blocked request with a normal-looking 200 page that
//! lacks the ad content. The classifier spots those stub pages and maps status
//! codes onto the outcomes the retry controller acts on. Classification is pure:
//! the same input always yields the same result.

use crate::SweepError;
use scraper::{Html, Selector};

/// Kind of page an attempt targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Listing,
    Detail,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Listing => "listing",
            PageKind::Detail => "detail",
        }
    }
}

/// Outcome of classifying one response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Valid,
    /// 200 page missing the content a real detail page always has
    SoftBlocked,
    RateLimited,
    ServerError,
    Unauthorized,
}

impl Classification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Classification::Valid)
    }
}

/// Content every genuine detail page carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubMarkers {
    /// Element whose text must be non-empty, e.g. the ad title
    pub heading_selector: String,
    /// Structured-data element that must be present with content
    pub data_selector: String,
    /// Raw body substrings that also count as structured data
    pub data_tokens: Vec<String>,
}

struct CompiledMarkers {
    heading: Selector,
    data: Selector,
    tokens: Vec<String>,
}

/// Maps HTTP responses onto [`Classification`]s
pub struct Classifier {
    markers: Option<CompiledMarkers>,
}

fn compile(selector: &str) -> Result<Selector, SweepError> {
    Selector::parse(selector).map_err(|e| SweepError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

impl Classifier {
    /// Creates a classifier
    ///
    /// # Arguments
    ///
    /// * `markers` - Stub markers for detail pages, `None` for sites that never serve stubs
    ///
    /// # Returns
    ///
    /// * `Ok(Classifier)` - Ready to classify
    /// * `Err(SweepError::Selector)` - A marker selector failed to parse
    pub fn new(markers: Option<StubMarkers>) -> Result<Self, SweepError> {
        let markers = match markers {
            Some(m) => Some(CompiledMarkers {
                heading: compile(&m.heading_selector)?,
                data: compile(&m.data_selector)?,
                tokens: m.data_tokens,
            }),
            None => None,
        };
        Ok(Self { markers })
    }

    /// Classifies a response
    ///
    /// Status checks run first: 401 is Unauthorized regardless of body, 429 is
    /// RateLimited and any 5xx is ServerError. A 2xx detail page missing its
    /// heading or its structured data is SoftBlocked. Everything else is Valid.
    pub fn classify(&self, kind: PageKind, status: u16, body: &str) -> Classification {
        match status {
            401 => return Classification::Unauthorized,
            429 => return Classification::RateLimited,
            500..=599 => return Classification::ServerError,
            _ => {}
        }

        if kind == PageKind::Detail && (200..300).contains(&status) {
            if let Some(markers) = &self.markers {
                if !has_markers(markers, body) {
                    return Classification::SoftBlocked;
                }
            }
        }

        Classification::Valid
    }
}

fn has_markers(markers: &CompiledMarkers, body: &str) -> bool {
    let document = Html::parse_document(body);

    let has_heading = document
        .select(&markers.heading)
        .any(|el| el.text().any(|t| !t.trim().is_empty()));
    if !has_heading {
        return false;
    }

    let has_data_element = document
        .select(&markers.data)
        .any(|el| el.text().any(|t| !t.trim().is_empty()));

    has_data_element || markers.tokens.iter().any(|t| body.contains(t.as_str()))
}
