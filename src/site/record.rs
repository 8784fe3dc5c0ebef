use chrono::{DateTime, Utc};

/// One ad discovered on a listing page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingItem {
    /// Site-assigned ad id
    pub ad_id: String,
    /// Absolute URL of the detail page or detail API call
    pub url: String,
}

/// Parsed listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Ads in page order, without duplicates
    pub items: Vec<ListingItem>,
    /// Last page number, when the site reports it
    pub last_page: Option<u32>,
}

/// Fields shared by every site, stored in `listings`
#[derive(Debug, Clone, PartialEq)]
pub struct CoreListing {
    pub ad_id: String,
    pub url: String,
    pub website: String,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i64>,
    pub trim: Option<String>,
    pub mileage: Option<i64>,
    pub mileage_unit: Option<String>,
    pub fuel_type: Option<String>,
    pub transmission_type: Option<String>,
    pub body_type: Option<String>,
    pub condition: Option<String>,
    pub color: Option<String>,
    pub seller: Option<String>,
    pub seller_type: Option<String>,
    pub location_city: Option<String>,
    pub location_region: Option<String>,
    pub image_url: Option<String>,
    pub number_of_images: Option<i64>,
    pub post_date: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
}

impl CoreListing {
    /// A core row with only its identifying fields set
    pub fn new(ad_id: &str, url: &str, website: &str, scraped_at: DateTime<Utc>) -> Self {
        Self {
            ad_id: ad_id.to_string(),
            url: url.to_string(),
            website: website.to_string(),
            title: None,
            price: None,
            currency: None,
            brand: None,
            model: None,
            year: None,
            trim: None,
            mileage: None,
            mileage_unit: None,
            fuel_type: None,
            transmission_type: None,
            body_type: None,
            condition: None,
            color: None,
            seller: None,
            seller_type: None,
            location_city: None,
            location_region: None,
            image_url: None,
            number_of_images: None,
            post_date: None,
            scraped_at,
        }
    }
}

/// Dubizzle-specific fields, stored in `dubizzle_details`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DubizzleDetail {
    pub name: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub image_urls: Vec<String>,
    pub price_valid_until: Option<String>,
    pub new_used: Option<String>,
    pub kilometers: Option<i64>,
    pub doors: Option<i64>,
    pub seats: Option<i64>,
    pub owners: Option<i64>,
    pub interior: Option<String>,
    pub air_con: Option<String>,
    pub ownership_type: Option<String>,
    pub price_type: Option<String>,
    pub seller_verified: Option<bool>,
    pub seller_id: Option<String>,
    pub agency_id: Option<String>,
    pub agency_name: Option<String>,
    pub is_agent: Option<bool>,
    pub loc_id: Option<String>,
    pub loc_name: Option<String>,
    pub loc_breadcrumb: Option<String>,
    pub loc_1_id: Option<String>,
    pub loc_1_name: Option<String>,
    pub loc_2_id: Option<String>,
    pub loc_2_name: Option<String>,
    pub category_1_id: Option<i64>,
    pub category_1_name: Option<String>,
    pub category_2_id: Option<i64>,
    pub category_2_name: Option<String>,
    pub page_type: Option<String>,
    pub has_video: Option<bool>,
    pub has_panorama: Option<bool>,
    pub deliverable: Option<bool>,
    pub source: Option<String>,
}

/// Syarah-specific fields, stored in `syarah_details`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyarahDetail {
    pub is_sold: bool,
    pub is_preowned: bool,
    pub interior_color: Option<String>,
    pub origin: Option<String>,
    pub cylinders: Option<i64>,
    pub engine_size: Option<String>,
    pub drive_type: Option<String>,
    pub number_of_keys: Option<String>,
    pub seats: Option<String>,
    pub engine_type: Option<String>,
}

/// Site-specific half of a record
#[derive(Debug, Clone, PartialEq)]
pub enum SiteDetail {
    Dubizzle(DubizzleDetail),
    Syarah(SyarahDetail),
}

/// A fully extracted ad, ready for the sink
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    pub core: CoreListing,
    pub detail: SiteDetail,
}

impl ExtractedRecord {
    pub fn ad_id(&self) -> &str {
        &self.core.ad_id
    }

    /// Free-text description, when the site provides one
    pub fn description(&self) -> Option<&str> {
        match &self.detail {
            SiteDetail::Dubizzle(d) => d.description.as_deref(),
            SiteDetail::Syarah(_) => None,
        }
    }
}
