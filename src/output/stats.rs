//! Statistics over stored listings
//!
//! This module provides functionality for extracting and displaying
//! what the database holds, independent of any running session.

use crate::storage::{RecordSink, RunRecord};
use crate::SweepError;

/// Per-website counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteStatistics {
    pub website: String,
    pub listings: u64,
    /// Rows in the site's detail table
    pub details: u64,
}

/// Stored data summary
#[derive(Debug, Clone)]
pub struct StoredStatistics {
    /// Total number of stored listings
    pub total_listings: u64,

    /// Breakdown by website, largest first
    pub websites: Vec<WebsiteStatistics>,

    /// Most recent crawl session, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoredStatistics)` - Successfully loaded statistics
/// * `Err(SweepError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn RecordSink) -> Result<StoredStatistics, SweepError> {
    let total_listings = storage.count_listings(None)?;

    let mut websites = Vec::new();
    for (website, listings) in storage.listings_by_website()? {
        let details = storage.count_details(&website)?;
        websites.push(WebsiteStatistics {
            website,
            listings,
            details,
        });
    }

    let latest_run = storage.get_latest_run()?;

    Ok(StoredStatistics {
        total_listings,
        websites,
        latest_run,
    })
}

/// Renders statistics as plain text
pub fn format_statistics(stats: &StoredStatistics) -> String {
    let mut out = String::from("=== Stored Listings ===\n\n");
    out.push_str(&format!("Total listings: {}\n\n", stats.total_listings));

    if !stats.websites.is_empty() {
        out.push_str("By website:\n");
        for site in &stats.websites {
            let coverage = if site.listings > 0 {
                (site.details as f64 / site.listings as f64) * 100.0
            } else {
                0.0
            };
            out.push_str(&format!(
                "  {}: {} listings, {} detail rows ({:.1}%)\n",
                site.website, site.listings, site.details, coverage
            ));
        }
        out.push('\n');
    }

    match &stats.latest_run {
        Some(run) => {
            out.push_str("Latest run:\n");
            out.push_str(&format!("  ID: {}\n", run.id));
            out.push_str(&format!("  Website: {} ({})\n", run.website, run.mode));
            out.push_str(&format!("  Started: {}\n", run.started_at));
            if let Some(finished) = &run.finished_at {
                out.push_str(&format!("  Finished: {}\n", finished));
            }
            out.push_str(&format!("  Status: {}\n", run.status.to_db_string()));
            if let Some(reason) = &run.stop_reason {
                out.push_str(&format!("  Stop reason: {}\n", reason));
            }
            out.push_str(&format!("  Records saved: {}\n", run.records_saved));
        }
        None => out.push_str("No crawl runs recorded\n"),
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &StoredStatistics) {
    print!("{}", format_statistics(stats));
}
