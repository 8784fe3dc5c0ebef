//! Database schema definitions
//!
//! `listings` holds the fields every site shares; each site keeps the rest in
//! its own detail table keyed by the same ad id.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl sessions
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    website TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    stop_reason TEXT,
    records_saved INTEGER NOT NULL DEFAULT 0
);

-- Fields shared by every site
CREATE TABLE IF NOT EXISTS listings (
    ad_id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    website TEXT NOT NULL,
    title TEXT,
    price REAL,
    currency TEXT,
    brand TEXT,
    model TEXT,
    year INTEGER,
    trim TEXT,
    mileage INTEGER,
    mileage_unit TEXT,
    fuel_type TEXT,
    transmission_type TEXT,
    body_type TEXT,
    condition TEXT,
    color TEXT,
    seller TEXT,
    seller_type TEXT,
    location_city TEXT,
    location_region TEXT,
    image_url TEXT,
    number_of_images INTEGER,
    post_date TEXT,
    scraped_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_listings_website ON listings(website);
CREATE INDEX IF NOT EXISTS idx_listings_url ON listings(url);

CREATE TABLE IF NOT EXISTS dubizzle_details (
    ad_id TEXT PRIMARY KEY REFERENCES listings(ad_id) ON DELETE CASCADE,
    name TEXT,
    sku TEXT,
    description TEXT,
    image_urls TEXT,
    price_valid_until TEXT,
    new_used TEXT,
    kilometers INTEGER,
    doors INTEGER,
    seats INTEGER,
    owners INTEGER,
    interior TEXT,
    air_con TEXT,
    ownership_type TEXT,
    price_type TEXT,
    seller_verified INTEGER,
    seller_id TEXT,
    agency_id TEXT,
    agency_name TEXT,
    is_agent INTEGER,
    loc_id TEXT,
    loc_name TEXT,
    loc_breadcrumb TEXT,
    loc_1_id TEXT,
    loc_1_name TEXT,
    loc_2_id TEXT,
    loc_2_name TEXT,
    category_1_id INTEGER,
    category_1_name TEXT,
    category_2_id INTEGER,
    category_2_name TEXT,
    page_type TEXT,
    has_video INTEGER,
    has_panorama INTEGER,
    deliverable INTEGER,
    source TEXT
);

CREATE TABLE IF NOT EXISTS syarah_details (
    ad_id TEXT PRIMARY KEY REFERENCES listings(ad_id) ON DELETE CASCADE,
    is_sold INTEGER NOT NULL DEFAULT 0,
    is_preowned INTEGER NOT NULL DEFAULT 0,
    interior_color TEXT,
    origin TEXT,
    cylinders INTEGER,
    engine_size TEXT,
    drive_type TEXT,
    number_of_keys TEXT,
    seats TEXT,
    engine_type TEXT
);
"#;

pub const LISTING_COLUMNS: &[&str] = &[
    "ad_id",
    "url",
    "website",
    "title",
    "price",
    "currency",
    "brand",
    "model",
    "year",
    "trim",
    "mileage",
    "mileage_unit",
    "fuel_type",
    "transmission_type",
    "body_type",
    "condition",
    "color",
    "seller",
    "seller_type",
    "location_city",
    "location_region",
    "image_url",
    "number_of_images",
    "post_date",
    "scraped_at",
];

pub const DUBIZZLE_COLUMNS: &[&str] = &[
    "ad_id",
    "name",
    "sku",
    "description",
    "image_urls",
    "price_valid_until",
    "new_used",
    "kilometers",
    "doors",
    "seats",
    "owners",
    "interior",
    "air_con",
    "ownership_type",
    "price_type",
    "seller_verified",
    "seller_id",
    "agency_id",
    "agency_name",
    "is_agent",
    "loc_id",
    "loc_name",
    "loc_breadcrumb",
    "loc_1_id",
    "loc_1_name",
    "loc_2_id",
    "loc_2_name",
    "category_1_id",
    "category_1_name",
    "category_2_id",
    "category_2_name",
    "page_type",
    "has_video",
    "has_panorama",
    "deliverable",
    "source",
];

pub const SYARAH_COLUMNS: &[&str] = &[
    "ad_id",
    "is_sold",
    "is_preowned",
    "interior_color",
    "origin",
    "cylinders",
    "engine_size",
    "drive_type",
    "number_of_keys",
    "seats",
    "engine_type",
];

/// Builds an `INSERT ... ON CONFLICT(ad_id) DO UPDATE` statement
///
/// Every column except `ad_id` is overwritten on conflict, so replaying a
/// record leaves the row as if it had been written once.
pub fn upsert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| **c != "ad_id")
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(ad_id) DO UPDATE SET {}",
        table,
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
