//! Configuration module for Carsweep
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use carsweep::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("carsweep.toml")).unwrap();
//! println!("Harvesting {} in {} mode", config.crawler.site, config.crawler.mode);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlMode, CrawlerConfig, EnrichmentConfig, IdentityConfig, OutputConfig, ProxyConfig,
    ProxySourceEntry, ProxySourceKind, RetryConfig, SiteKind,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
