//! Storage traits and error types
//!
//! This module defines the trait interface for record sinks and the
//! associated error types.

use crate::site::{CoreListing, ExtractedRecord};
use crate::storage::{RunRecord, RunStatus};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for extracted records
///
/// Writes are idempotent: upserting a record twice leaves the same rows as
/// upserting it once. A detail row is never written without its core row.
pub trait RecordSink {
    // ===== Records =====

    /// Writes one record's core and detail rows in a single transaction
    fn upsert(&mut self, record: &ExtractedRecord) -> StorageResult<()>;

    /// Writes several records in one transaction, core before detail for each
    ///
    /// # Returns
    ///
    /// The number of records written
    fn upsert_batch(&mut self, records: &[ExtractedRecord]) -> StorageResult<usize>;

    /// Ad ids already stored for a website
    fn seen_ids(&self, website: &str) -> StorageResult<HashSet<String>>;

    /// Gets the core row of an ad
    fn get_listing(&self, ad_id: &str) -> StorageResult<Option<CoreListing>>;

    /// Counts stored listings, optionally for one website only
    fn count_listings(&self, website: Option<&str>) -> StorageResult<u64>;

    /// Listing counts grouped by website
    fn listings_by_website(&self) -> StorageResult<Vec<(String, u64)>>;

    /// Counts rows in a site's detail table
    fn count_details(&self, website: &str) -> StorageResult<u64>;

    // ===== Run Management =====

    /// Records the start of a session
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str, website: &str, mode: &str) -> StorageResult<i64>;

    /// Records how a session ended
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        stop_reason: Option<&str>,
        records_saved: u64,
    ) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;
}
