//! Crawler module for fetching and processing listing sites
//!
//! This module contains the core crawling logic, including:
//! - Response classification (valid, soft-blocked, rate limited, ...)
//! - Retry decisions with jittered exponential backoff
//! - The delayed queue retries wait in
//! - HTTP fetching through per-egress clients
//! - Overall session coordination

mod classifier;
mod coordinator;
mod fetcher;
mod retry;
mod scheduler;

pub use classifier::{Classification, Classifier, PageKind, StubMarkers};
pub use coordinator::{run_crawl, Coordinator, SessionReport};
pub use fetcher::{FetchOutcome, FetchedPage, Fetcher};
pub use retry::{Backoff, FailureClass, RetryController, RetryDecision};
pub use scheduler::{QueuedFetch, Scheduler};

use crate::config::Config;
use crate::SweepError;

/// Runs a complete crawl session
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the database and record a new run
/// 2. Seed seen ad ids in incremental mode
/// 3. Walk listing pages and fetch every new ad's detail page
/// 4. Write extracted records and report how the session ended
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
///
/// # Returns
///
/// * `Ok(SessionReport)` - The session ended
/// * `Err(SweepError)` - The session could not start
pub async fn crawl(config: Config, config_hash: String) -> Result<SessionReport, SweepError> {
    run_crawl(config, config_hash).await
}
