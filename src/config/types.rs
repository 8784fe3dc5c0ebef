use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Main configuration structure for Carsweep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Supported listing sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    /// HTML site with JSON-LD and dataLayer blocks on detail pages
    Dubizzle,
    /// JSON search and detail API
    Syarah,
}

impl SiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteKind::Dubizzle => "dubizzle",
            SiteKind::Syarah => "syarah",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a crawl session decides when to stop paginating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Walk listing pages up to `max-pages`
    Full,
    /// Seed seen IDs from storage and stop after consecutive pages with nothing new
    #[default]
    Incremental,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Full => "full",
            CrawlMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(CrawlMode::Full),
            "incremental" => Ok(CrawlMode::Incremental),
            other => Err(format!(
                "unknown crawl mode '{}', expected 'full' or 'incremental'",
                other
            )),
        }
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Which site to harvest
    pub site: SiteKind,

    #[serde(default)]
    pub mode: CrawlMode,

    /// Upper bound on listing pages walked in one session
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Consecutive listing pages without a new ad that end an incremental session
    #[serde(rename = "empty-page-threshold", default = "default_empty_page_threshold")]
    pub empty_page_threshold: u32,

    /// Maximum number of in-flight fetches
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Session ends as stalled when no fetch succeeds for this long
    #[serde(rename = "stall-timeout-secs", default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,

    /// Overrides the site's public origin
    #[serde(rename = "base-url", default)]
    pub base_url: Option<String>,
}

fn default_max_pages() -> u32 {
    500
}

fn default_empty_page_threshold() -> u32 {
    2
}

fn default_concurrency() -> u32 {
    8
}

fn default_request_timeout() -> u64 {
    30
}

fn default_stall_timeout() -> u64 {
    900
}

/// Backoff and pacing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "base-delay-ms", default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Fraction of the delay used as the uniform jitter half-width
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Attempts allowed per fetch, 0 retries forever
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "think-chance", default = "default_think_chance")]
    pub think_chance: f64,

    #[serde(rename = "think-min-ms", default = "default_think_min")]
    pub think_min_ms: u64,

    #[serde(rename = "think-max-ms", default = "default_think_max")]
    pub think_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
            max_attempts: default_max_attempts(),
            think_chance: default_think_chance(),
            think_min_ms: default_think_min(),
            think_max_ms: default_think_max(),
        }
    }
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_think_chance() -> f64 {
    0.05
}

fn default_think_min() -> u64 {
    100
}

fn default_think_max() -> u64 {
    500
}

/// Identity pool configuration; empty lists fall back to built-in defaults
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(rename = "user-agents", default)]
    pub user_agents: Vec<String>,

    #[serde(rename = "accept-languages", default)]
    pub accept_languages: Vec<String>,

    /// Referers point at a random listing page in `1..=referer-pages`
    #[serde(rename = "referer-pages", default = "default_referer_pages")]
    pub referer_pages: u32,

    #[serde(rename = "exclude-mobile", default = "default_true")]
    pub exclude_mobile: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agents: Vec::new(),
            accept_languages: Vec::new(),
            referer_pages: default_referer_pages(),
            exclude_mobile: true,
        }
    }
}

fn default_referer_pages() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Static paid proxies, always part of the pool
    #[serde(default)]
    pub paid: Vec<String>,

    #[serde(rename = "max-free-proxies", default = "default_max_free")]
    pub max_free_proxies: usize,

    #[serde(default)]
    pub sources: Vec<ProxySourceEntry>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paid: Vec::new(),
            max_free_proxies: default_max_free(),
            sources: Vec::new(),
        }
    }
}

fn default_max_free() -> usize {
    1_000
}

/// Kind of free proxy list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxySourceKind {
    /// Geonode-style JSON API
    Geonode,
    /// Newline-separated `host:port` or proxy URLs
    PlainList,
}

/// One free proxy list endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySourceEntry {
    pub kind: ProxySourceKind,
    pub url: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Records buffered before a flush, 1 writes every record immediately
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    1
}

/// Post-extraction enrichment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichmentConfig {
    /// Master trim list used to infer missing trims
    #[serde(default)]
    pub trims: Vec<String>,
}
