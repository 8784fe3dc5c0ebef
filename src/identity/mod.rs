//! Identity pool for Carsweep
//!
//! Every fetch attempt carries an [`Identity`]: the user agent, language and
//! referer it presents, plus an optional browser [`Fingerprint`]. Identities are
//! drawn at random and replaced on every retry. The pool also owns the one cookie
//! jar shared by all HTTP clients of a run, so every request presents the same
//! session cookies.

mod fingerprint;

pub use fingerprint::Fingerprint;

use crate::config::IdentityConfig;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::sync::Arc;

static MOBILE_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Mobile|Android|iPhone|iPad|iPod|Windows Phone|Opera Mini|BlackBerry|IEMobile")
        .expect("mobile user agent pattern is valid")
});

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; SM-S918B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
];

const DEFAULT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "ar-SA,ar;q=0.9,en;q=0.8",
];

/// Placeholder replaced with a page number in referer templates
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Returns true if the user agent belongs to a phone or tablet browser
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    MOBILE_UA.is_match(user_agent)
}

/// Request identity assigned to one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: Option<String>,
    pub fingerprint: Option<Fingerprint>,
}

impl Identity {
    /// Headers this identity adds to a request
    pub fn headers(&self) -> HeaderMap {
        let mut headers = self
            .fingerprint
            .map(|fp| fp.headers())
            .unwrap_or_default();

        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        if let Some(referer) = self.referer.as_deref() {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert(REFERER, value);
            }
        }
        headers
    }
}

/// Source of randomized request identities
pub struct IdentityPool {
    user_agents: Vec<String>,
    languages: Vec<String>,
    referer_template: Option<String>,
    referer_pages: u32,
    exclude_mobile: bool,
    cookie_jar: Arc<Jar>,
}

impl IdentityPool {
    /// Creates a pool from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Identity settings; empty lists fall back to built-in defaults
    /// * `referer_template` - Listing URL with a `{page}` placeholder, if the site uses referers
    pub fn new(config: &IdentityConfig, referer_template: Option<&str>) -> Self {
        let user_agents = if config.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            config.user_agents.clone()
        };
        let languages = if config.accept_languages.is_empty() {
            DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect()
        } else {
            config.accept_languages.clone()
        };

        Self {
            user_agents,
            languages,
            referer_template: referer_template.map(str::to_string),
            referer_pages: config.referer_pages.max(1),
            exclude_mobile: config.exclude_mobile,
            cookie_jar: Arc::new(Jar::default()),
        }
    }

    /// Whether this pool was configured to skip mobile user agents
    pub fn exclude_mobile(&self) -> bool {
        self.exclude_mobile
    }

    /// Cookie jar shared by every client of the run
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.cookie_jar)
    }

    /// Draws a fresh identity without a fingerprint
    pub fn draw(&self, exclude_mobile: bool) -> Identity {
        let mut rng = rand::thread_rng();
        Identity {
            user_agent: self.pick_user_agent(&mut rng, exclude_mobile),
            accept_language: self.pick_language(&mut rng),
            referer: self.pick_referer(&mut rng),
            fingerprint: None,
        }
    }

    /// Draws the identity for a retry of an attempt that used `previous`
    ///
    /// The previous fingerprint is kept unless `rotate_fingerprint` is set, in
    /// which case a different one is chosen. A fingerprinted identity always
    /// reports the fingerprint's own user agent.
    pub fn redraw(&self, previous: &Identity, rotate_fingerprint: bool) -> Identity {
        let mut rng = rand::thread_rng();

        let fingerprint = if rotate_fingerprint {
            let choices: Vec<Fingerprint> = Fingerprint::ALL
                .iter()
                .copied()
                .filter(|fp| Some(*fp) != previous.fingerprint)
                .collect();
            choices.choose(&mut rng).copied()
        } else {
            previous.fingerprint
        };

        let user_agent = match fingerprint {
            Some(fp) => fp.user_agent().to_string(),
            None => self.pick_user_agent(&mut rng, self.exclude_mobile),
        };

        Identity {
            user_agent,
            accept_language: self.pick_language(&mut rng),
            referer: self.pick_referer(&mut rng),
            fingerprint,
        }
    }

    fn pick_user_agent<R: Rng>(&self, rng: &mut R, exclude_mobile: bool) -> String {
        let candidates: Vec<&String> = self
            .user_agents
            .iter()
            .filter(|ua| !exclude_mobile || !is_mobile_user_agent(ua))
            .collect();

        match candidates.choose(rng) {
            Some(ua) => ua.to_string(),
            None => Fingerprint::Chrome119.user_agent().to_string(),
        }
    }

    fn pick_language<R: Rng>(&self, rng: &mut R) -> String {
        self.languages
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_LANGUAGES[0].to_string())
    }

    fn pick_referer<R: Rng>(&self, rng: &mut R) -> Option<String> {
        let template = self.referer_template.as_ref()?;
        let page = rng.gen_range(1..=self.referer_pages);
        Some(template.replace(PAGE_PLACEHOLDER, &page.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> IdentityPool {
        IdentityPool::new(
            &IdentityConfig::default(),
            Some("https://www.dubizzle.sa/en/vehicles/cars-for-sale/?page={page}"),
        )
    }

    #[test]
    fn test_mobile_detection() {
        assert!(is_mobile_user_agent(
            "Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X) AppleWebKit/605.1.15"
        ));
        assert!(is_mobile_user_agent("Opera/9.80 (J2ME/MIDP; Opera Mini/9.80)"));
        assert!(is_mobile_user_agent("Mozilla/5.0 (compatible; MSIE 10.0; Windows Phone 8.0)"));
        assert!(!is_mobile_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/124.0.0.0"
        ));
    }

    #[test]
    fn test_draw_excludes_mobile() {
        let pool = pool();
        for _ in 0..200 {
            let identity = pool.draw(true);
            assert!(!is_mobile_user_agent(&identity.user_agent));
            assert!(identity.fingerprint.is_none());
        }
    }

    #[test]
    fn test_referer_uses_template_range() {
        let pool = pool();
        for _ in 0..100 {
            let referer = pool.draw(true).referer.unwrap();
            let page: u32 = referer.rsplit('=').next().unwrap().parse().unwrap();
            assert!((1..=10).contains(&page));
        }
    }

    #[test]
    fn test_no_referer_without_template() {
        let pool = IdentityPool::new(&IdentityConfig::default(), None);
        assert!(pool.draw(true).referer.is_none());
    }

    #[test]
    fn test_redraw_rotates_fingerprint() {
        let pool = pool();
        let mut identity = pool.draw(true);
        for _ in 0..50 {
            let next = pool.redraw(&identity, true);
            let fp = next.fingerprint.unwrap();
            assert_ne!(Some(fp), identity.fingerprint);
            assert_eq!(next.user_agent, fp.user_agent());
            identity = next;
        }
    }

    #[test]
    fn test_redraw_keeps_fingerprint_without_rotation() {
        let pool = pool();
        let start = pool.redraw(&pool.draw(true), true);
        let next = pool.redraw(&start, false);
        assert_eq!(next.fingerprint, start.fingerprint);
    }

    #[test]
    fn test_headers() {
        let identity = Identity {
            user_agent: "UA/1.0".to_string(),
            accept_language: "en-GB,en;q=0.8".to_string(),
            referer: Some("https://example.com/?page=2".to_string()),
            fingerprint: Some(Fingerprint::Chrome110),
        };
        let headers = identity.headers();
        assert_eq!(headers[USER_AGENT], "UA/1.0");
        assert_eq!(headers[ACCEPT_LANGUAGE], "en-GB,en;q=0.8");
        assert_eq!(headers[REFERER], "https://example.com/?page=2");
        assert!(headers.contains_key("sec-ch-ua"));
    }

    #[test]
    fn test_configured_lists_override_defaults() {
        let config = IdentityConfig {
            user_agents: vec!["Custom/1.0".to_string()],
            accept_languages: vec!["fr-FR".to_string()],
            referer_pages: 1,
            exclude_mobile: true,
        };
        let identity = IdentityPool::new(&config, None).draw(true);
        assert_eq!(identity.user_agent, "Custom/1.0");
        assert_eq!(identity.accept_language, "fr-FR");
    }
}
