//! Dubizzle: server-rendered HTML listing and detail pages
//!
//! Detail pages carry a JSON-LD product block, a `dataLayer` push with most of
//! the vehicle attributes and a `window.state` blob with the posting time,
//! seller name and trim.

use super::fields::{self, bool_at, capture_json, f64_at, i64_at, path, text_at};
use super::{
    origin_of, selector, CoreListing, DubizzleDetail, ExtractError, ExtractedRecord, ListingItem,
    ListingPage, Site, SiteDetail,
};
use crate::crawler::{PageKind, StubMarkers};
use crate::identity::PAGE_PLACEHOLDER;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use scraper::Html;
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

const DEFAULT_ORIGIN: &str = "https://www.dubizzle.sa";
const LISTING_PATH: &str = "/en/vehicles/cars-for-sale/";
const LISTING_LINKS: &str = r#"li[aria-label="Listing"] a[href*="/en/ad/"]"#;
const JSON_LD: &str = r#"script[type="application/ld+json"]"#;
const WEBSITE: &str = "Dubizzle";

static DATA_LAYER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"window\['dataLayer'\]\.push\((\{[\s\S]*?\})\)").expect("dataLayer pattern is valid")
});

static WINDOW_STATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"window\.state\s*=\s*(\{[\s\S]*?\});").expect("window.state pattern is valid")
});

/// Extracts the ad id from a detail link such as `/en/ad/toyota-camry-ID110.html`
pub fn ad_id_from_href(href: &str) -> Option<String> {
    let (_, tail) = href.rsplit_once("-ID")?;
    let id = tail.split(['.', '/', '?', '#']).next()?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())).then(|| id.to_string())
}

pub struct Dubizzle {
    origin: String,
}

impl Dubizzle {
    pub fn new(base: Option<Url>) -> Self {
        let origin = base
            .as_ref()
            .map(origin_of)
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        Self { origin }
    }
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty()))
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty()))
}

/// First JSON-LD object on the page, unwrapping top-level arrays
fn json_ld(document: &Html) -> Result<Value, ExtractError> {
    let sel = selector(JSON_LD)?;
    for el in document.select(&sel) {
        let raw = el.text().collect::<String>();
        let parsed = match serde_json::from_str::<Value>(raw.trim()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        match parsed {
            Value::Object(_) => return Ok(parsed),
            Value::Array(items) => {
                if let Some(obj) = items.into_iter().find(Value::is_object) {
                    return Ok(obj);
                }
            }
            _ => {}
        }
    }
    Ok(Value::Null)
}

/// `brand` is either a plain string or a `{"@type": "Brand", "name": ...}` object
fn brand_name(schema: &Value) -> Option<String> {
    let brand = schema.get("brand")?;
    fields::as_text(brand).or_else(|| text_at(brand, &["name"]))
}

fn image_urls(schema: &Value) -> Vec<String> {
    match schema.get("image") {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Value::Array(items)) => items.iter().filter_map(fields::as_text).collect(),
        _ => Vec::new(),
    }
}

impl Site for Dubizzle {
    fn name(&self) -> &'static str {
        "dubizzle"
    }

    fn website(&self) -> &'static str {
        WEBSITE
    }

    fn listing_url(&self, page: u32) -> String {
        format!("{}{}?page={}", self.origin, LISTING_PATH, page)
    }

    fn parse_listing(&self, page: u32, url: &str, body: &str) -> Result<ListingPage, ExtractError> {
        let base = Url::parse(url).map_err(|e| ExtractError::Malformed(e.to_string()))?;
        let document = Html::parse_document(body);
        let links = selector(LISTING_LINKS)?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for el in document.select(&links) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let Some(ad_id) = ad_id_from_href(href) else {
                tracing::debug!(href, "Listing link without ad id");
                continue;
            };
            if !seen.insert(ad_id.clone()) {
                continue;
            }
            match crate::url::resolve_link(&base, href) {
                Ok(resolved) => items.push(ListingItem {
                    ad_id,
                    url: resolved.to_string(),
                }),
                Err(e) => tracing::debug!(href, error = %e, "Unresolvable listing link"),
            }
        }

        // A challenge page has no listings and no heading; a genuine empty page keeps its heading
        if items.is_empty() && first_text(&document, "h1")?.is_none() {
            return Err(ExtractError::Malformed(format!(
                "listing page {} has neither ads nor a heading",
                page
            )));
        }

        Ok(ListingPage {
            items,
            last_page: None,
        })
    }

    fn parse_detail(
        &self,
        item: &ListingItem,
        final_url: &str,
        body: &str,
    ) -> Result<ExtractedRecord, ExtractError> {
        let document = Html::parse_document(body);
        let schema = json_ld(&document)?;
        let data_layer = capture_json(&DATA_LAYER, body).unwrap_or(Value::Null);
        let state = capture_json(&WINDOW_STATE, body).unwrap_or(Value::Null);

        if schema.is_null() && data_layer.is_null() {
            return Err(ExtractError::Unusable(format!(
                "ad {} has no structured data",
                item.ad_id
            )));
        }

        let ad_id = if item.ad_id.is_empty() {
            ad_id_from_href(final_url)
                .ok_or_else(|| ExtractError::Unusable(format!("no ad id in {}", final_url)))?
        } else {
            item.ad_id.clone()
        };

        let dl = &data_layer;
        let ad_data = path(&state, &["ad", "data"]).unwrap_or(&Value::Null);

        let mut core = CoreListing::new(&ad_id, final_url, WEBSITE, Utc::now());
        core.title = text_at(&schema, &["name"]).or(first_text(&document, "h1")?);
        core.price = f64_at(dl, &["price"]);
        core.currency = text_at(dl, &["currency_unit"]);
        core.brand = brand_name(&schema).or_else(|| text_at(dl, &["make"]));
        core.model = text_at(&schema, &["model"]).or_else(|| text_at(dl, &["model"]));
        core.year = i64_at(&schema, &["modelDate"]).or_else(|| i64_at(dl, &["year"]));
        core.trim = path(ad_data, &["extraFields", "version"]).and_then(fields::as_text);
        core.mileage = i64_at(dl, &["mileage"]);
        core.mileage_unit = text_at(dl, &["area_unit"]);
        core.fuel_type = text_at(&schema, &["fuelType"]).or_else(|| text_at(dl, &["fuel_type"]));
        core.transmission_type = text_at(dl, &["transmission"]);
        core.body_type = text_at(dl, &["body_type"]);
        core.condition = text_at(dl, &["ad_condition"]);
        core.color = text_at(dl, &["color"]);
        core.seller = text_at(ad_data, &["name"]);
        core.seller_type = text_at(dl, &["seller_type"]);
        core.location_city = text_at(dl, &["loc_name"]);
        core.location_region = text_at(dl, &["loc_2_name", "loc_1_name"]);
        core.image_url = first_attr(&document, "link[rel=preload][as=image]", "href")?
            .or(first_attr(&document, r#"meta[property="og:image"]"#, "content")?)
            .or_else(|| match schema.get("image") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            });
        core.number_of_images = i64_at(dl, &["number_of_photos"]);
        core.post_date = ad_data.get("timestamp").and_then(fields::parse_timestamp);

        let detail = DubizzleDetail {
            name: text_at(&schema, &["name"]),
            sku: text_at(&schema, &["sku"]),
            description: text_at(&schema, &["description"]),
            image_urls: image_urls(&schema),
            price_valid_until: text_at(&schema, &["priceValidUntil"]),
            new_used: text_at(dl, &["new_used"]),
            kilometers: core.mileage,
            doors: text_at(dl, &["doors"]).and_then(|d| fields::door_count(&d)),
            seats: i64_at(dl, &["seats"]),
            owners: i64_at(dl, &["owners"]),
            interior: text_at(dl, &["interior"]),
            air_con: text_at(dl, &["air_con"]),
            ownership_type: text_at(dl, &["ownership_type"]),
            price_type: text_at(dl, &["price_type"]),
            seller_verified: bool_at(dl, &["seller_verified"]),
            seller_id: text_at(dl, &["seller_id"]),
            agency_id: text_at(dl, &["agency_id", "company_ids"]),
            agency_name: text_at(dl, &["agency_name"]),
            is_agent: bool_at(dl, &["is_agent"]),
            loc_id: text_at(dl, &["loc_id"]),
            loc_name: text_at(dl, &["loc_name"]),
            loc_breadcrumb: text_at(dl, &["loc_breadcrumb"]),
            loc_1_id: text_at(dl, &["loc_1_id"]),
            loc_1_name: text_at(dl, &["loc_1_name"]),
            loc_2_id: text_at(dl, &["loc_2_id"]),
            loc_2_name: text_at(dl, &["loc_2_name"]),
            category_1_id: i64_at(dl, &["category_1_id"]),
            category_1_name: text_at(dl, &["category_1_name"]),
            category_2_id: i64_at(dl, &["category_2_id"]),
            category_2_name: text_at(dl, &["category_2_name"]),
            page_type: text_at(dl, &["page_type"]),
            has_video: bool_at(dl, &["video"]),
            has_panorama: bool_at(dl, &["panorama"]),
            deliverable: bool_at(dl, &["deliverable"]),
            source: text_at(dl, &["source"]),
        };

        Ok(ExtractedRecord {
            core,
            detail: SiteDetail::Dubizzle(detail),
        })
    }

    fn stub_markers(&self) -> Option<StubMarkers> {
        Some(StubMarkers {
            heading_selector: "h1".to_string(),
            data_selector: JSON_LD.to_string(),
            data_tokens: vec!["dataLayer".to_string()],
        })
    }

    fn referer_template(&self) -> Option<String> {
        Some(format!(
            "{}{}?page={}",
            self.origin, LISTING_PATH, PAGE_PLACEHOLDER
        ))
    }

    fn request_headers(&self, _kind: PageKind) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers
    }
}
