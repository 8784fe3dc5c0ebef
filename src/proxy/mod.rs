//! Proxy pool for Carsweep
//!
//! Egress proxies come from two places: a static list of paid proxies in the
//! configuration and free proxy lists fetched from [`ProxySource`]s. The
//! [`ProxyPool`] hands them out round-robin, tracks leases, blacklists proxies
//! that produced a failure and rebuilds itself on refresh.

mod pool;
mod source;

pub use pool::{PoolStats, ProxyPool};
pub use source::{build_sources, GeonodeSource, PlainListSource, ProxySource};

use std::fmt;
use thiserror::Error;

/// Errors raised while loading or parsing proxies
#[derive(Debug, Error)]
pub enum ProxySourceError {
    #[error("HTTP error fetching {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed proxy list from {url}: {message}")]
    Malformed { url: String, message: String },

    #[error("Invalid proxy entry '{0}'")]
    InvalidEntry(String),
}

/// Proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            "socks5" | "socks5h" => Some(ProxyScheme::Socks5),
            _ => None,
        }
    }
}

/// Where a proxy came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyOrigin {
    Free,
    Paid,
}

/// Health of a pool entry within its generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    Active,
    Blacklisted,
}

/// One egress proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    /// `host:port`, optionally prefixed with `user:pass@`
    pub address: String,
    pub scheme: ProxyScheme,
    pub origin: ProxyOrigin,
    pub status: ProxyStatus,
    /// Pool build this record was handed out from
    pub generation: u64,
}

impl ProxyRecord {
    /// Parses `host:port` or `scheme://[user:pass@]host:port`
    ///
    /// Entries without a scheme default to http.
    pub fn parse(entry: &str, origin: ProxyOrigin) -> Result<Self, ProxySourceError> {
        let entry = entry.trim();
        let (scheme, address) = match entry.split_once("://") {
            Some((scheme, rest)) => (
                ProxyScheme::parse(scheme)
                    .ok_or_else(|| ProxySourceError::InvalidEntry(entry.to_string()))?,
                rest.trim_end_matches('/'),
            ),
            None => (ProxyScheme::Http, entry),
        };

        let host_port = address.rsplit('@').next().unwrap_or(address);
        let valid = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                !host.is_empty()
                    && !host.contains(char::is_whitespace)
                    && port.parse::<u16>().map(|p| p > 0).unwrap_or(false)
            }
            None => false,
        };
        if !valid {
            return Err(ProxySourceError::InvalidEntry(entry.to_string()));
        }

        Ok(Self {
            address: address.to_string(),
            scheme,
            origin,
            status: ProxyStatus::Active,
            generation: 0,
        })
    }

    /// Proxy URL handed to the HTTP client
    pub fn endpoint(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.address)
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials stay out of logs
        let host_port = self.address.rsplit('@').next().unwrap_or(&self.address);
        write!(f, "{}://{}", self.scheme.as_str(), host_port)
    }
}
