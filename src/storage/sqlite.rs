//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the RecordSink trait.

use crate::site::{CoreListing, DubizzleDetail, ExtractedRecord, SiteDetail, SyarahDetail};
use crate::storage::schema::{
    initialize_schema, upsert_sql, DUBIZZLE_COLUMNS, LISTING_COLUMNS, SYARAH_COLUMNS,
};
use crate::storage::traits::{RecordSink, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use crate::SweepError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashSet;
use std::path::Path;

static LISTING_UPSERT: Lazy<String> = Lazy::new(|| upsert_sql("listings", LISTING_COLUMNS));
static DUBIZZLE_UPSERT: Lazy<String> =
    Lazy::new(|| upsert_sql("dubizzle_details", DUBIZZLE_COLUMNS));
static SYARAH_UPSERT: Lazy<String> = Lazy::new(|| upsert_sql("syarah_details", SYARAH_COLUMNS));

const RUN_COLUMNS: &str =
    "id, started_at, finished_at, config_hash, website, mode, status, stop_reason, records_saved";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SweepError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SweepError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, SweepError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Deletes an ad; its detail row goes with it
    pub fn delete_listing(&mut self, ad_id: &str) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM listings WHERE ad_id = ?1", params![ad_id])?;
        Ok(deleted > 0)
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn write_core(tx: &Transaction<'_>, c: &CoreListing) -> StorageResult<()> {
    let mut stmt = tx.prepare_cached(&LISTING_UPSERT)?;
    stmt.execute(params![
        c.ad_id,
        c.url,
        c.website,
        c.title,
        c.price,
        c.currency,
        c.brand,
        c.model,
        c.year,
        c.trim,
        c.mileage,
        c.mileage_unit,
        c.fuel_type,
        c.transmission_type,
        c.body_type,
        c.condition,
        c.color,
        c.seller,
        c.seller_type,
        c.location_city,
        c.location_region,
        c.image_url,
        c.number_of_images,
        c.post_date.as_ref().map(timestamp),
        timestamp(&c.scraped_at),
    ])?;
    Ok(())
}

fn write_dubizzle(tx: &Transaction<'_>, ad_id: &str, d: &DubizzleDetail) -> StorageResult<()> {
    let image_urls = if d.image_urls.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&d.image_urls)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        )
    };

    let mut stmt = tx.prepare_cached(&DUBIZZLE_UPSERT)?;
    stmt.execute(params![
        ad_id,
        d.name,
        d.sku,
        d.description,
        image_urls,
        d.price_valid_until,
        d.new_used,
        d.kilometers,
        d.doors,
        d.seats,
        d.owners,
        d.interior,
        d.air_con,
        d.ownership_type,
        d.price_type,
        d.seller_verified,
        d.seller_id,
        d.agency_id,
        d.agency_name,
        d.is_agent,
        d.loc_id,
        d.loc_name,
        d.loc_breadcrumb,
        d.loc_1_id,
        d.loc_1_name,
        d.loc_2_id,
        d.loc_2_name,
        d.category_1_id,
        d.category_1_name,
        d.category_2_id,
        d.category_2_name,
        d.page_type,
        d.has_video,
        d.has_panorama,
        d.deliverable,
        d.source,
    ])?;
    Ok(())
}

fn write_syarah(tx: &Transaction<'_>, ad_id: &str, s: &SyarahDetail) -> StorageResult<()> {
    let mut stmt = tx.prepare_cached(&SYARAH_UPSERT)?;
    stmt.execute(params![
        ad_id,
        s.is_sold,
        s.is_preowned,
        s.interior_color,
        s.origin,
        s.cylinders,
        s.engine_size,
        s.drive_type,
        s.number_of_keys,
        s.seats,
        s.engine_type,
    ])?;
    Ok(())
}

/// Core row first so the detail row's foreign key always resolves
fn write_record(tx: &Transaction<'_>, record: &ExtractedRecord) -> StorageResult<()> {
    write_core(tx, &record.core)?;
    match &record.detail {
        SiteDetail::Dubizzle(detail) => write_dubizzle(tx, record.ad_id(), detail),
        SiteDetail::Syarah(detail) => write_syarah(tx, record.ad_id(), detail),
    }
}

fn detail_table(website: &str) -> Option<&'static str> {
    match website.to_ascii_lowercase().as_str() {
        "dubizzle" => Some("dubizzle_details"),
        "syarah" => Some("syarah_details"),
        _ => None,
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        website: row.get(4)?,
        mode: row.get(5)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(6)?)
            .unwrap_or(RunStatus::Running),
        stop_reason: row.get(7)?,
        records_saved: row.get::<_, i64>(8)?.max(0) as u64,
    })
}

impl RecordSink for SqliteStorage {
    // ===== Records =====

    fn upsert(&mut self, record: &ExtractedRecord) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        write_record(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_batch(&mut self, records: &[ExtractedRecord]) -> StorageResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        for record in records {
            write_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn seen_ids(&self, website: &str) -> StorageResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ad_id FROM listings WHERE website = ?1")?;
        let ids = stmt
            .query_map(params![website], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    fn get_listing(&self, ad_id: &str) -> StorageResult<Option<CoreListing>> {
        let sql = format!(
            "SELECT {} FROM listings WHERE ad_id = ?1",
            LISTING_COLUMNS.join(", ")
        );
        let listing = self
            .conn
            .query_row(&sql, params![ad_id], |row| {
                Ok(CoreListing {
                    ad_id: row.get(0)?,
                    url: row.get(1)?,
                    website: row.get(2)?,
                    title: row.get(3)?,
                    price: row.get(4)?,
                    currency: row.get(5)?,
                    brand: row.get(6)?,
                    model: row.get(7)?,
                    year: row.get(8)?,
                    trim: row.get(9)?,
                    mileage: row.get(10)?,
                    mileage_unit: row.get(11)?,
                    fuel_type: row.get(12)?,
                    transmission_type: row.get(13)?,
                    body_type: row.get(14)?,
                    condition: row.get(15)?,
                    color: row.get(16)?,
                    seller: row.get(17)?,
                    seller_type: row.get(18)?,
                    location_city: row.get(19)?,
                    location_region: row.get(20)?,
                    image_url: row.get(21)?,
                    number_of_images: row.get(22)?,
                    post_date: parse_timestamp(row.get(23)?),
                    scraped_at: parse_timestamp(row.get(24)?).unwrap_or_else(Utc::now),
                })
            })
            .optional()?;
        Ok(listing)
    }

    fn count_listings(&self, website: Option<&str>) -> StorageResult<u64> {
        let count: i64 = match website {
            Some(site) => self.conn.query_row(
                "SELECT COUNT(*) FROM listings WHERE website = ?1",
                params![site],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    fn listings_by_website(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT website, COUNT(*) FROM listings GROUP BY website ORDER BY COUNT(*) DESC, website",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count_details(&self, website: &str) -> StorageResult<u64> {
        let Some(table) = detail_table(website) else {
            return Ok(0);
        };
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str, website: &str, mode: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, website, mode, status) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![now, config_hash, website, mode, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        stop_reason: Option<&str>,
        records_saved: u64,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, stop_reason = ?3, records_saved = ?4 WHERE id = ?5",
            params![
                status.to_db_string(),
                now,
                stop_reason,
                records_saved as i64,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        let run = self.conn.query_row(&sql, [], run_from_row).optional()?;
        Ok(run)
    }
}
