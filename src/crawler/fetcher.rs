//! HTTP fetcher
//!
//! Requests are decorated with the attempt's identity and the site's headers,
//! then sent through a client bound to the attempt's proxy and fingerprint.
//! Clients are cached per (proxy, fingerprint) pair and all share the
//! identity pool's cookie jar. Status codes are not judged here; that is the
//! classifier's job.

use crate::identity::{Fingerprint, Identity};
use crate::proxy::ProxyRecord;
use parking_lot::Mutex;
use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type ClientKey = (Option<String>, Option<Fingerprint>);

/// A response that arrived, whatever its status
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    /// Final URL after redirects
    pub final_url: String,
    pub body: String,
}

/// Result of one network call
#[derive(Debug)]
pub enum FetchOutcome {
    Response(FetchedPage),
    /// Connect, DNS, TLS, timeout or body read error
    Transport(String),
}

/// Sends requests through cached, per-egress HTTP clients
pub struct Fetcher {
    cookie_jar: Arc<Jar>,
    timeout: Duration,
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl Fetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    ///
    /// * `cookie_jar` - Jar shared by every client so the session cookies stick
    /// * `timeout` - Whole-request timeout, connect through body read
    pub fn new(cookie_jar: Arc<Jar>, timeout: Duration) -> Self {
        Self {
            cookie_jar,
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Drops every cached client
    ///
    /// Called after a proxy pool refresh so clients for retired proxies go away.
    pub fn clear_clients(&self) {
        self.clients.lock().clear();
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.lock().len()
    }

    fn client_for(
        &self,
        proxy: Option<&ProxyRecord>,
        fingerprint: Option<Fingerprint>,
    ) -> Result<Client, reqwest::Error> {
        let key = (proxy.map(ProxyRecord::endpoint), fingerprint);
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .cookie_provider(Arc::clone(&self.cookie_jar))
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)))
            .gzip(true)
            .brotli(true);
        if let Some(fp) = fingerprint {
            builder = fp.configure(builder);
        }
        builder = match &key.0 {
            Some(endpoint) => builder.proxy(Proxy::all(endpoint.as_str())?),
            None => builder.no_proxy(),
        };

        let client = builder.build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Performs one GET
    ///
    /// # Arguments
    ///
    /// * `url` - Target URL
    /// * `identity` - Supplies user agent, language, referer and fingerprint headers
    /// * `proxy` - Egress proxy, `None` to connect directly
    /// * `site_headers` - Site headers, applied over the identity's
    ///
    /// # Returns
    ///
    /// The response with its status and body, or a transport failure
    pub async fn fetch(
        &self,
        url: &str,
        identity: &Identity,
        proxy: Option<&ProxyRecord>,
        site_headers: HeaderMap,
    ) -> FetchOutcome {
        let client = match self.client_for(proxy, identity.fingerprint) {
            Ok(client) => client,
            Err(e) => return FetchOutcome::Transport(format!("client setup failed: {}", e)),
        };

        let mut headers = identity.headers();
        headers.extend(site_headers);

        let response = match client.get(url).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => return FetchOutcome::Transport(describe(&e)),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        match response.text().await {
            Ok(body) => FetchOutcome::Response(FetchedPage {
                status,
                final_url,
                body,
            }),
            Err(e) => FetchOutcome::Transport(format!("body read failed: {}", describe(&e))),
        }
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timeout".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyOrigin;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        Fetcher::new(Arc::new(Jar::default()), Duration::from_secs(5))
    }

    fn identity(fingerprint: Option<Fingerprint>) -> Identity {
        Identity {
            user_agent: "TestAgent/1.0".to_string(),
            accept_language: "en-GB,en;q=0.8".to_string(),
            referer: Some("https://example.com/?page=3".to_string()),
            fingerprint,
        }
    }

    #[test]
    fn test_clients_cached_per_egress() {
        let fetcher = fetcher();
        let proxy = ProxyRecord::parse("10.0.0.1:8080", ProxyOrigin::Paid).unwrap();

        fetcher.client_for(None, None).unwrap();
        fetcher.client_for(None, None).unwrap();
        assert_eq!(fetcher.cached_clients(), 1);

        fetcher.client_for(Some(&proxy), None).unwrap();
        fetcher.client_for(None, Some(Fingerprint::Firefox133)).unwrap();
        assert_eq!(fetcher.cached_clients(), 3);

        fetcher.clear_clients();
        assert_eq!(fetcher.cached_clients(), 0);
    }

    #[tokio::test]
    async fn test_fetch_sends_identity_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/listing"))
            .and(header("user-agent", "TestAgent/1.0"))
            .and(header("accept-language", "en-GB,en;q=0.8"))
            .and(header("referer", "https://example.com/?page=3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>ok</h1>"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/listing", server.uri());
        match fetcher().fetch(&url, &identity(None), None, HeaderMap::new()).await {
            FetchOutcome::Response(page) => {
                assert_eq!(page.status, 200);
                assert_eq!(page.body, "<h1>ok</h1>");
                assert_eq!(page.final_url, url);
            }
            FetchOutcome::Transport(e) => panic!("unexpected transport failure: {}", e),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let outcome = fetcher()
            .fetch(&server.uri(), &identity(Some(Fingerprint::Chrome119)), None, HeaderMap::new())
            .await;
        assert!(matches!(outcome, FetchOutcome::Response(FetchedPage { status: 429, .. })));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let outcome = fetcher()
            .fetch("http://127.0.0.1:9/", &identity(None), None, HeaderMap::new())
            .await;
        assert!(matches!(outcome, FetchOutcome::Transport(_)));
    }
}
