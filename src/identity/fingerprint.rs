//! Browser impersonation fingerprints
//!
//! A fingerprint bundles the user agent and client-hint headers a given browser
//! build sends with the HTTP/2 flow-control settings it negotiates. Clients
//! built for different fingerprints are never shared.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::ClientBuilder;
use std::fmt;

/// Browser builds the crawler can impersonate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Chrome110,
    Chrome119,
    Edge99,
    Firefox133,
    Safari15_5,
    Safari17_0,
}

/// Static request profile of one browser build
struct Profile {
    user_agent: &'static str,
    accept: &'static str,
    client_hints: &'static [(&'static str, &'static str)],
    stream_window: u32,
    connection_window: u32,
}

const CHROME_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const FIREFOX_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const SAFARI_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const CHROME110: Profile = Profile {
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36",
    accept: CHROME_ACCEPT,
    client_hints: &[
        ("sec-ch-ua", "\"Chromium\";v=\"110\", \"Not A(Brand\";v=\"24\", \"Google Chrome\";v=\"110\""),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "same-origin"),
        ("upgrade-insecure-requests", "1"),
    ],
    stream_window: 6_291_456,
    connection_window: 15_728_640,
};

const CHROME119: Profile = Profile {
    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    accept: CHROME_ACCEPT,
    client_hints: &[
        ("sec-ch-ua", "\"Google Chrome\";v=\"119\", \"Chromium\";v=\"119\", \"Not?A_Brand\";v=\"24\""),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"macOS\""),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "same-origin"),
        ("upgrade-insecure-requests", "1"),
    ],
    stream_window: 6_291_456,
    connection_window: 15_728_640,
};

const EDGE99: Profile = Profile {
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/99.0.4844.51 Safari/537.36 Edg/99.0.1150.36",
    accept: CHROME_ACCEPT,
    client_hints: &[
        ("sec-ch-ua", "\" Not A;Brand\";v=\"99\", \"Chromium\";v=\"99\", \"Microsoft Edge\";v=\"99\""),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "same-origin"),
        ("upgrade-insecure-requests", "1"),
    ],
    stream_window: 6_291_456,
    connection_window: 15_663_105,
};

const FIREFOX133: Profile = Profile {
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    accept: FIREFOX_ACCEPT,
    client_hints: &[
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-user", "?1"),
        ("upgrade-insecure-requests", "1"),
    ],
    stream_window: 131_072,
    connection_window: 12_517_377,
};

const SAFARI15_5: Profile = Profile {
    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.5 Safari/605.1.15",
    accept: SAFARI_ACCEPT,
    client_hints: &[],
    stream_window: 4_194_304,
    connection_window: 10_551_295,
};

const SAFARI17_0: Profile = Profile {
    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    accept: SAFARI_ACCEPT,
    client_hints: &[
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "same-origin"),
    ],
    stream_window: 2_097_152,
    connection_window: 10_485_760,
};

impl Fingerprint {
    /// Every supported fingerprint
    pub const ALL: [Fingerprint; 6] = [
        Fingerprint::Chrome110,
        Fingerprint::Chrome119,
        Fingerprint::Edge99,
        Fingerprint::Firefox133,
        Fingerprint::Safari15_5,
        Fingerprint::Safari17_0,
    ];

    fn profile(&self) -> &'static Profile {
        match self {
            Fingerprint::Chrome110 => &CHROME110,
            Fingerprint::Chrome119 => &CHROME119,
            Fingerprint::Edge99 => &EDGE99,
            Fingerprint::Firefox133 => &FIREFOX133,
            Fingerprint::Safari15_5 => &SAFARI15_5,
            Fingerprint::Safari17_0 => &SAFARI17_0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Fingerprint::Chrome110 => "chrome110",
            Fingerprint::Chrome119 => "chrome119",
            Fingerprint::Edge99 => "edge99",
            Fingerprint::Firefox133 => "firefox133",
            Fingerprint::Safari15_5 => "safari15_5",
            Fingerprint::Safari17_0 => "safari17_0",
        }
    }

    /// User agent the impersonated browser reports
    pub fn user_agent(&self) -> &'static str {
        self.profile().user_agent
    }

    /// Browser-specific headers sent alongside the identity headers
    pub fn headers(&self) -> HeaderMap {
        let profile = self.profile();
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(profile.accept),
        );
        for (name, value) in profile.client_hints {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    /// Applies the browser's transport settings to a client under construction
    pub fn configure(&self, builder: ClientBuilder) -> ClientBuilder {
        let profile = self.profile();
        builder
            .http2_initial_stream_window_size(profile.stream_window)
            .http2_initial_connection_window_size(profile.connection_window)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_are_distinct() {
        let agents: std::collections::HashSet<_> =
            Fingerprint::ALL.iter().map(|f| f.user_agent()).collect();
        assert_eq!(agents.len(), Fingerprint::ALL.len());
    }

    #[test]
    fn test_chromium_sends_client_hints() {
        let headers = Fingerprint::Chrome119.headers();
        assert!(headers.contains_key("sec-ch-ua"));
        assert_eq!(headers["sec-ch-ua-mobile"], "?0");

        let safari = Fingerprint::Safari15_5.headers();
        assert!(!safari.contains_key("sec-ch-ua"));
        assert!(safari.contains_key(reqwest::header::ACCEPT));
    }

    #[test]
    fn test_fingerprint_user_agents_are_desktop() {
        for fp in Fingerprint::ALL {
            assert!(!crate::identity::is_mobile_user_agent(fp.user_agent()), "{}", fp);
        }
    }
}
