use super::{ProxyOrigin, ProxyRecord, ProxySourceError};
use crate::config::{ProxySourceEntry, ProxySourceKind};
use async_trait::async_trait;
use serde_json::Value;

/// A list of free proxies that can be fetched on demand
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Downloads the current list
    ///
    /// Every returned record has origin [`ProxyOrigin::Free`].
    async fn fetch(&self, client: &reqwest::Client) -> Result<Vec<ProxyRecord>, ProxySourceError>;
}

/// Builds the configured proxy sources
pub fn build_sources(entries: &[ProxySourceEntry]) -> Vec<Box<dyn ProxySource>> {
    entries
        .iter()
        .map(|entry| -> Box<dyn ProxySource> {
            match entry.kind {
                ProxySourceKind::Geonode => Box::new(GeonodeSource::new(&entry.url)),
                ProxySourceKind::PlainList => Box::new(PlainListSource::new(&entry.url)),
            }
        })
        .collect()
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, ProxySourceError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProxySourceError::Http {
            url: url.to_string(),
            source: e,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProxySourceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| ProxySourceError::Http {
        url: url.to_string(),
        source: e,
    })
}

/// Geonode-style JSON proxy list
///
/// Expects `{"data": [{"ip": "...", "port": "...", "protocols": ["http", ...]}]}`.
/// Entries advertising https are used as https proxies, everything else as http.
pub struct GeonodeSource {
    url: String,
}

impl GeonodeSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    /// Parses a response body into proxy records, skipping unusable rows
    pub fn parse_body(&self, body: &str) -> Result<Vec<ProxyRecord>, ProxySourceError> {
        let json: Value = serde_json::from_str(body).map_err(|e| ProxySourceError::Malformed {
            url: self.url.clone(),
            message: e.to_string(),
        })?;

        let rows = json
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ProxySourceError::Malformed {
                url: self.url.clone(),
                message: "missing 'data' array".to_string(),
            })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let ip = row.get("ip").and_then(Value::as_str);
            let port = match row.get("port") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            let (Some(ip), Some(port)) = (ip, port) else {
                continue;
            };

            let https = row
                .get("protocols")
                .and_then(Value::as_array)
                .map(|protocols| protocols.iter().any(|p| p.as_str() == Some("https")))
                .unwrap_or(false);
            let scheme = if https { "https" } else { "http" };

            match ProxyRecord::parse(&format!("{}://{}:{}", scheme, ip, port), ProxyOrigin::Free) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(source = %self.url, error = %e, "Skipping proxy row"),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl ProxySource for GeonodeSource {
    fn name(&self) -> &str {
        "geonode"
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<Vec<ProxyRecord>, ProxySourceError> {
        let body = get_text(client, &self.url).await?;
        self.parse_body(&body)
    }
}

/// Plain-text proxy list, one `host:port` or proxy URL per line
///
/// Blank lines and lines starting with `#` are ignored.
pub struct PlainListSource {
    url: String,
}

impl PlainListSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    pub fn parse_body(&self, body: &str) -> Vec<ProxyRecord> {
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| match ProxyRecord::parse(line, ProxyOrigin::Free) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!(source = %self.url, error = %e, "Skipping proxy line");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl ProxySource for PlainListSource {
    fn name(&self) -> &str {
        "plain-list"
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<Vec<ProxyRecord>, ProxySourceError> {
        let body = get_text(client, &self.url).await?;
        Ok(self.parse_body(&body))
    }
}
