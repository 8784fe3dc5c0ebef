//! Syarah: JSON search and detail API
//!
//! Listing pages are search API calls returning `data.products[].id` plus
//! pagination metadata; each product is fetched through the post view API.
//! The API never serves stub pages, so no markers are configured.

use super::codes::{body_type_code, color_code, transmission_code};
use super::fields::{self, as_text, i64_at, path, text_at};
use super::{
    origin_of, CoreListing, ExtractError, ExtractedRecord, ListingItem, ListingPage, Site,
    SiteDetail, SyarahDetail,
};
use crate::crawler::{PageKind, StubMarkers};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ORIGIN};
use serde_json::{json, Value};
use std::collections::HashSet;
use url::form_urlencoded;
use url::Url;

const DEFAULT_ORIGIN: &str = "https://newapi.syarah.com";
const SEARCH_PATH: &str = "/syarah_v1/en/search/index";
const DETAIL_PATH: &str = "/syarah_v1/en/post/view-online";
const PAGE_SIZE: usize = 12;
const WEBSITE: &str = "Syarah";
const DETAIL_INCLUDES: &str = "details,price,story,quality,meta,analytics,campaign,g4Data,options,featuredImage,gallery_section,gallery,fuel,faqs,footerdetails,footer";

pub struct Syarah {
    origin: String,
}

impl Syarah {
    pub fn new(base: Option<Url>) -> Self {
        let origin = base
            .as_ref()
            .map(origin_of)
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        Self { origin }
    }

    /// Detail API URL for a product id
    pub fn detail_url(&self, id: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("id", id)
            .append_pair("thumb_size", "300")
            .append_pair("device_type", "web")
            .append_pair("should_redirect", "1")
            .append_pair("include", DETAIL_INCLUDES)
            .finish();
        format!("{}{}?{}", self.origin, DETAIL_PATH, query)
    }
}

fn data_of(body: &str) -> Result<Value, ExtractError> {
    let mut json: Value = serde_json::from_str(body)?;
    match json.get_mut("data").map(Value::take) {
        Some(data) if data.is_object() => Ok(data),
        _ => Err(ExtractError::Malformed("response has no 'data' object".to_string())),
    }
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(fields::as_bool).unwrap_or(false)
}

/// Featured gallery image, else the first one
fn featured_image(images: &[Value]) -> Option<String> {
    images
        .iter()
        .find(|img| img.get("is_featured").and_then(fields::as_i64) == Some(1))
        .or_else(|| images.first())
        .and_then(|img| text_at(img, &["img_url"]))
}

impl Site for Syarah {
    fn name(&self) -> &'static str {
        "syarah"
    }

    fn website(&self) -> &'static str {
        WEBSITE
    }

    fn listing_url(&self, page: u32) -> String {
        let search_data = json!({
            "filters": {"text": ""},
            "link": "",
            "page": page,
            "sort": "",
            "size": PAGE_SIZE,
            "new_path": false,
        });
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("ps", "1-12")
            .append_pair("includes", "usps,meta_tags,meta")
            .append_pair("search_data", &search_data.to_string())
            .finish();
        format!("{}{}?{}", self.origin, SEARCH_PATH, query)
    }

    fn parse_listing(&self, page: u32, _url: &str, body: &str) -> Result<ListingPage, ExtractError> {
        let data = data_of(body)?;
        let products = data
            .get("products")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(products.len());
        for product in products {
            let Some(id) = product.get("id").and_then(as_text) else {
                tracing::warn!(page, "Search result without id");
                continue;
            };
            if seen.insert(id.clone()) {
                items.push(ListingItem {
                    url: self.detail_url(&id),
                    ad_id: id,
                });
            }
        }

        let reported = path(&data, &["meta", "last_page"])
            .and_then(fields::as_i64)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|&n| n > 0);
        // Without pagination metadata a short page is the last one
        let last_page = reported.or_else(|| (products.len() < PAGE_SIZE).then_some(page));

        Ok(ListingPage { items, last_page })
    }

    fn parse_detail(
        &self,
        item: &ListingItem,
        final_url: &str,
        body: &str,
    ) -> Result<ExtractedRecord, ExtractError> {
        let data = data_of(body).map_err(|e| ExtractError::Unusable(e.to_string()))?;
        let details = data.get("details").unwrap_or(&Value::Null);
        let analytics = data.get("analytics").unwrap_or(&Value::Null);
        let g4 = data.get("g4Data").unwrap_or(&Value::Null);
        let card = details.get("details_card").unwrap_or(&Value::Null);

        if flag(details, "is_deleted") {
            return Err(ExtractError::Unusable(format!("ad {} was deleted", item.ad_id)));
        }

        let images: &[Value] = path(&data, &["gallery", "images"])
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let url = text_at(details, &["share_link"]).unwrap_or_else(|| final_url.to_string());
        let mut core = CoreListing::new(&item.ad_id, &url, WEBSITE, Utc::now());
        core.title = text_at(details, &["title"]).or_else(|| text_at(analytics, &["name"]));
        core.brand = text_at(analytics, &["brand"]);
        core.model = text_at(analytics, &["model"]);
        core.year = i64_at(analytics, &["year"]);
        core.price = fields::f64_at(analytics, &["price"]);
        core.currency = path(&data, &["price", "currency"]).and_then(as_text);
        core.trim = text_at(analytics, &["options"]);
        core.mileage = i64_at(analytics, &["mileage"]);
        core.mileage_unit = Some("km".to_string());
        core.fuel_type = text_at(analytics, &["fuel"]);
        core.transmission_type = text_at(analytics, &["transmission"])
            .and_then(|t| transmission_code(&t))
            .map(str::to_string);
        core.body_type = text_at(analytics, &["shape"])
            .and_then(|s| body_type_code(&s))
            .map(str::to_string);
        core.condition = text_at(analytics, &["condition"]);
        core.color = text_at(analytics, &["color"])
            .and_then(|c| color_code(&c))
            .map(str::to_string);
        core.seller = path(details, &["warranty_card", "wakeel", "name"]).and_then(as_text);
        core.seller_type = Some("Private".to_string());
        core.location_city = text_at(g4, &["post_city"]);
        core.location_region = core.location_city.clone();
        core.image_url = featured_image(images);
        core.number_of_images = Some(images.len() as i64);
        core.post_date = g4.get("list_date").and_then(fields::parse_timestamp);

        let detail = SyarahDetail {
            is_sold: flag(details, "is_sold"),
            is_preowned: flag(details, "is_preowned"),
            interior_color: path(card, &["interior_color", "name"])
                .and_then(as_text)
                .and_then(|c| color_code(&c))
                .map(str::to_string),
            origin: path(card, &["car_origin", "name"]).and_then(as_text),
            cylinders: i64_at(analytics, &["cylinders"])
                .or_else(|| path(card, &["cylinders", "id"]).and_then(fields::as_i64)),
            engine_size: text_at(analytics, &["engine_size"]),
            drive_type: text_at(analytics, &["drivetrain"]),
            number_of_keys: path(card, &["number_of_keys", "name"]).and_then(as_text),
            seats: path(card, &["seats", "name"]).and_then(as_text),
            engine_type: path(card, &["engine_type", "name"]).and_then(as_text),
        };

        Ok(ExtractedRecord {
            core,
            detail: SiteDetail::Syarah(detail),
        })
    }

    fn stub_markers(&self) -> Option<StubMarkers> {
        None
    }

    fn referer_template(&self) -> Option<String> {
        None
    }

    fn request_headers(&self, _kind: PageKind) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://syarah.com"));
        headers.insert(HeaderName::from_static("device"), HeaderValue::from_static("web"));
        headers.insert(
            HeaderName::from_static("accept-enhancedstatuscodes"),
            HeaderValue::from_static("1"),
        );
        headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("cors"));
        headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static("empty"));
        headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static("same-site"));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Syarah {
        Syarah::new(None)
    }

    #[test]
    fn test_listing_url_carries_page() {
        let url = Url::parse(&site().listing_url(4)).unwrap();
        assert_eq!(url.path(), SEARCH_PATH);
        let search_data = url
            .query_pairs()
            .find(|(k, _)| k == "search_data")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let parsed: Value = serde_json::from_str(&search_data).unwrap();
        assert_eq!(parsed["page"], 4);
        assert_eq!(parsed["size"], 12);
    }

    #[test]
    fn test_parse_listing_with_meta() {
        let body = r#"{"data": {"products": [{"id": 501}, {"id": 502}, {"id": 501}, {"title": "x"}],
            "meta": {"last_page": 40}}}"#;
        let page = site().parse_listing(1, "", body).unwrap();
        let ids: Vec<_> = page.items.iter().map(|i| i.ad_id.as_str()).collect();
        assert_eq!(ids, vec!["501", "502"]);
        assert_eq!(page.last_page, Some(40));
        assert!(page.items[0].url.contains("id=501"));
        assert!(page.items[0].url.contains(DETAIL_PATH));
    }

    #[test]
    fn test_short_page_without_meta_is_last() {
        let body = r#"{"data": {"products": [{"id": "7"}]}}"#;
        let page = site().parse_listing(3, "", body).unwrap();
        assert_eq!(page.last_page, Some(3));
    }

    #[test]
    fn test_empty_products() {
        let page = site().parse_listing(2, "", r#"{"data": {"products": []}}"#).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(site().parse_listing(1, "", "<html>blocked</html>").is_err());
        assert!(site().parse_listing(1, "", r#"{"error": "x"}"#).is_err());
    }

    #[test]
    fn test_parse_detail() {
        let body = r#"{"data": {
            "details": {"title": "Hyundai Elantra 2022", "share_link": "https://syarah.com/en/car/501",
                "is_sold": 0, "is_deleted": 0, "is_preowned": 1,
                "details_card": {"interior_color": {"name": "Beige"}, "car_origin": {"name": "Saudi"},
                    "cylinders": {"id": 4}, "number_of_keys": {"name": "2"}, "seats": {"name": "5"},
                    "engine_type": {"name": "Petrol"}},
                "warranty_card": {"wakeel": {"name": "Hyundai Dealer"}}},
            "analytics": {"brand": "Hyundai", "model": "Elantra", "year": 2022, "price": 68000,
                "options": "Smart", "mileage": "35000", "fuel": "Petrol", "transmission": "Automatic",
                "shape": "Sedan", "color": "White", "drivetrain": "FWD", "engine_size": "2.0"},
            "price": {"currency": "SAR"},
            "g4Data": {"post_city": "Jeddah", "list_date": "2024-03-01 08:00:00"},
            "gallery": {"images": [{"img_url": "https://img/1.jpg"}, {"img_url": "https://img/2.jpg", "is_featured": 1}]}
        }}"#;
        let item = ListingItem {
            ad_id: "501".to_string(),
            url: site().detail_url("501"),
        };
        let record = site().parse_detail(&item, &item.url, body).unwrap();
        let core = &record.core;
        assert_eq!(core.url, "https://syarah.com/en/car/501");
        assert_eq!(core.website, "Syarah");
        assert_eq!(core.trim.as_deref(), Some("Smart"));
        assert_eq!(core.mileage, Some(35_000));
        assert_eq!(core.transmission_type.as_deref(), Some("2"));
        assert_eq!(core.body_type.as_deref(), Some("3"));
        assert_eq!(core.color.as_deref(), Some("12"));
        assert_eq!(core.currency.as_deref(), Some("SAR"));
        assert_eq!(core.image_url.as_deref(), Some("https://img/2.jpg"));
        assert_eq!(core.number_of_images, Some(2));
        assert!(core.post_date.is_some());

        let SiteDetail::Syarah(detail) = &record.detail else {
            panic!("expected syarah detail");
        };
        assert!(detail.is_preowned);
        assert!(!detail.is_sold);
        assert_eq!(detail.interior_color.as_deref(), Some("15"));
        assert_eq!(detail.cylinders, Some(4));
        assert_eq!(detail.seats.as_deref(), Some("5"));
    }

    #[test]
    fn test_deleted_ad_is_unusable() {
        let body = r#"{"data": {"details": {"is_deleted": 1}}}"#;
        let item = ListingItem {
            ad_id: "9".to_string(),
            url: site().detail_url("9"),
        };
        assert!(matches!(
            site().parse_detail(&item, &item.url, body),
            Err(ExtractError::Unusable(_))
        ));
    }

    #[test]
    fn test_json_headers() {
        let headers = site().request_headers(PageKind::Listing);
        assert_eq!(headers[ACCEPT], "application/json");
        assert_eq!(headers["device"], "web");
    }
}
