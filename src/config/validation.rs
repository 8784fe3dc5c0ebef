use crate::config::types::{
    Config, CrawlerConfig, EnrichmentConfig, OutputConfig, ProxyConfig, RetryConfig,
};
use crate::proxy::{ProxyOrigin, ProxyRecord};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_retry_config(&config.retry)?;
    validate_stall_budget(&config.crawler, &config.retry)?;
    validate_identity_config(config)?;
    validate_proxy_config(&config.proxy)?;
    validate_output_config(&config.output)?;
    validate_enrichment_config(&config.enrichment)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1".to_string(),
        ));
    }

    if config.empty_page_threshold < 1 {
        return Err(ConfigError::Validation(
            "empty_page_threshold must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.stall_timeout_secs < config.request_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "stall_timeout_secs ({}) must not be shorter than request_timeout_secs ({})",
            config.stall_timeout_secs, config.request_timeout_secs
        )));
    }

    if let Some(base) = &config.base_url {
        let url = Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url '{}': {}", base, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "base_url '{}' must use http or https",
                base
            )));
        }
    }

    Ok(())
}

/// Validates backoff and pacing settings
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_delay_ms ({}) must be >= base_delay_ms ({})",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "jitter must be within 0.0..=1.0, got {}",
            config.jitter
        )));
    }

    if !(0.0..=1.0).contains(&config.think_chance) {
        return Err(ConfigError::Validation(format!(
            "think_chance must be within 0.0..=1.0, got {}",
            config.think_chance
        )));
    }

    if config.think_max_ms < config.think_min_ms {
        return Err(ConfigError::Validation(format!(
            "think_max_ms ({}) must be >= think_min_ms ({})",
            config.think_max_ms, config.think_min_ms
        )));
    }

    Ok(())
}

/// The stall clock keeps running while a retry waits out its backoff, so the
/// longest backoff plus one request must fit inside the stall timeout
fn validate_stall_budget(crawler: &CrawlerConfig, retry: &RetryConfig) -> Result<(), ConfigError> {
    let longest_backoff_ms = retry.max_delay_ms as f64 * (1.0 + retry.jitter);
    let needed_ms = longest_backoff_ms + (crawler.request_timeout_secs * 1_000) as f64;
    let stall_ms = (crawler.stall_timeout_secs * 1_000) as f64;

    if stall_ms <= needed_ms {
        return Err(ConfigError::Validation(format!(
            "stall_timeout_secs ({}) must exceed the longest backoff ({:.0}ms) plus request_timeout_secs ({})",
            crawler.stall_timeout_secs, longest_backoff_ms, crawler.request_timeout_secs
        )));
    }

    Ok(())
}

fn validate_identity_config(config: &Config) -> Result<(), ConfigError> {
    let identity = &config.identity;

    if identity.referer_pages < 1 {
        return Err(ConfigError::Validation(
            "referer_pages must be >= 1".to_string(),
        ));
    }

    if identity.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    // An all-mobile list would leave nothing to draw from
    if identity.exclude_mobile
        && !identity.user_agents.is_empty()
        && identity
            .user_agents
            .iter()
            .all(|ua| crate::identity::is_mobile_user_agent(ua))
    {
        return Err(ConfigError::Validation(
            "exclude_mobile is set but every configured user agent is mobile".to_string(),
        ));
    }

    if identity
        .accept_languages
        .iter()
        .any(|lang| lang.trim().is_empty())
    {
        return Err(ConfigError::Validation(
            "accept_languages cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates paid proxies and proxy source URLs
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    for entry in &config.paid {
        ProxyRecord::parse(entry, ProxyOrigin::Paid)
            .map_err(|e| ConfigError::InvalidProxy(format!("'{}': {}", entry, e)))?;
    }

    for source in &config.sources {
        Url::parse(&source.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid proxy source '{}': {}", source.url, e))
        })?;
    }

    if config.enabled && config.paid.is_empty() && config.sources.is_empty() {
        return Err(ConfigError::Validation(
            "proxy is enabled but neither paid proxies nor sources are configured".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_enrichment_config(config: &EnrichmentConfig) -> Result<(), ConfigError> {
    if config.trims.iter().any(|t| t.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "trims cannot contain empty entries".to_string(),
        ));
    }
    Ok(())
}
