//! Output module for session reports and stored-data statistics
//!
//! This module handles:
//! - Rendering the report of a finished crawl session
//! - Summarizing what the database holds

mod report;
pub mod stats;

pub use report::{format_report, print_report};
pub use stats::{
    format_statistics, load_statistics, print_statistics, StoredStatistics, WebsiteStatistics,
};
