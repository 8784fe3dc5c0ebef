use super::{ProxyRecord, ProxySource, ProxyStatus};
use crate::config::ProxyConfig;
use crate::proxy::{build_sources, ProxyOrigin};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Snapshot of pool health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub blacklisted: usize,
    pub leased: usize,
    pub generation: u64,
}

struct PoolInner {
    entries: Vec<ProxyRecord>,
    cursor: usize,
    /// Outstanding leases per endpoint
    leased: HashMap<String, usize>,
    generation: u64,
}

impl PoolInner {
    fn install(&mut self, entries: Vec<ProxyRecord>) {
        self.generation += 1;
        let generation = self.generation;
        self.entries = entries
            .into_iter()
            .map(|mut record| {
                record.status = ProxyStatus::Active;
                record.generation = generation;
                record
            })
            .collect();
        self.cursor = 0;
        self.leased.clear();
    }

    fn lease_count(&self, endpoint: &str) -> usize {
        self.leased.get(endpoint).copied().unwrap_or(0)
    }

    fn drop_lease(&mut self, endpoint: &str) {
        if let Some(count) = self.leased.get_mut(endpoint) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.leased.remove(endpoint);
            }
        }
    }
}

/// Shared, refreshable pool of egress proxies
///
/// All state sits behind one short-lived lock; list downloads during
/// [`ProxyPool::refresh`] happen outside it.
pub struct ProxyPool {
    enabled: bool,
    paid: Vec<ProxyRecord>,
    max_free: usize,
    sources: Vec<Box<dyn ProxySource>>,
    client: reqwest::Client,
    inner: Mutex<PoolInner>,
}

impl ProxyPool {
    /// Creates a pool from configuration, seeded with the paid proxies
    pub fn new(config: &ProxyConfig) -> crate::Result<Self> {
        let mut paid = Vec::with_capacity(config.paid.len());
        for entry in &config.paid {
            let record = ProxyRecord::parse(entry, ProxyOrigin::Paid).map_err(|e| {
                crate::ConfigError::InvalidProxy(format!("'{}': {}", entry, e))
            })?;
            paid.push(record);
        }

        Self::with_sources(
            config.enabled,
            paid,
            build_sources(&config.sources),
            config.max_free_proxies,
        )
    }

    /// Creates a pool from explicit parts
    pub fn with_sources(
        enabled: bool,
        paid: Vec<ProxyRecord>,
        sources: Vec<Box<dyn ProxySource>>,
        max_free: usize,
    ) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let mut inner = PoolInner {
            entries: Vec::new(),
            cursor: 0,
            leased: HashMap::new(),
            generation: 0,
        };
        inner.install(paid.clone());

        Ok(Self {
            enabled,
            paid,
            max_free,
            sources,
            client,
            inner: Mutex::new(inner),
        })
    }

    /// A pool that never hands out a proxy
    pub fn disabled() -> crate::Result<Self> {
        Self::with_sources(false, Vec::new(), Vec::new(), 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Leases the next usable proxy
    ///
    /// Entries are visited round-robin. An active entry nobody holds is
    /// preferred; if every active entry is leased, one is shared.
    ///
    /// # Returns
    ///
    /// * `Some(ProxyRecord)` - The leased proxy
    /// * `None` - The pool is disabled, empty or fully blacklisted; fetch directly
    pub fn acquire(&self) -> Option<ProxyRecord> {
        if !self.enabled {
            return None;
        }

        let mut inner = self.inner.lock();
        let len = inner.entries.len();
        if len == 0 {
            return None;
        }

        let start = inner.cursor % len;
        let order = (0..len).map(|offset| (start + offset) % len);

        let mut chosen = None;
        for idx in order.clone() {
            let entry = &inner.entries[idx];
            if entry.status == ProxyStatus::Active && inner.lease_count(&entry.endpoint()) == 0 {
                chosen = Some(idx);
                break;
            }
        }
        if chosen.is_none() {
            chosen = order
                .into_iter()
                .find(|&idx| inner.entries[idx].status == ProxyStatus::Active);
        }

        let idx = chosen?;
        inner.cursor = (idx + 1) % len;
        let record = inner.entries[idx].clone();
        *inner.leased.entry(record.endpoint()).or_insert(0) += 1;
        Some(record)
    }

    /// Returns a lease; stale generations are ignored
    pub fn release(&self, proxy: &ProxyRecord) {
        let mut inner = self.inner.lock();
        if proxy.generation != inner.generation {
            return;
        }
        inner.drop_lease(&proxy.endpoint());
    }

    /// Marks a proxy unusable for the rest of its generation and drops its lease
    ///
    /// # Returns
    ///
    /// `true` if the entry was active and is now blacklisted
    pub fn blacklist(&self, proxy: &ProxyRecord) -> bool {
        let mut inner = self.inner.lock();
        if proxy.generation != inner.generation {
            return false;
        }

        let endpoint = proxy.endpoint();
        inner.drop_lease(&endpoint);

        match inner
            .entries
            .iter_mut()
            .find(|entry| entry.endpoint() == endpoint)
        {
            Some(entry) if entry.status == ProxyStatus::Active => {
                entry.status = ProxyStatus::Blacklisted;
                tracing::debug!(proxy = %proxy, "Proxy blacklisted");
                true
            }
            _ => false,
        }
    }

    /// Rebuilds the pool from the paid list and fresh free lists
    ///
    /// Sources are fetched without holding the lock. When every configured
    /// source fails the current pool is kept.
    ///
    /// # Returns
    ///
    /// Number of entries in the pool afterwards
    pub async fn refresh(&self) -> usize {
        if !self.enabled {
            return 0;
        }

        let mut free = Vec::new();
        let mut failures = 0;
        for source in &self.sources {
            match source.fetch(&self.client).await {
                Ok(records) => {
                    tracing::debug!(source = source.name(), count = records.len(), "Fetched proxy list");
                    free.extend(records);
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(source = source.name(), error = %e, "Proxy source failed");
                }
            }
        }

        if !self.sources.is_empty() && failures == self.sources.len() {
            let stats = self.stats();
            tracing::warn!(
                kept = stats.total,
                "All proxy sources failed, keeping current pool"
            );
            return stats.total;
        }

        let mut seen = HashSet::new();
        let mut merged: Vec<ProxyRecord> = Vec::with_capacity(self.paid.len() + free.len());
        for record in self.paid.iter().cloned() {
            if seen.insert(record.endpoint()) {
                merged.push(record);
            }
        }
        let mut free_count = 0;
        for record in free {
            if free_count >= self.max_free {
                break;
            }
            if seen.insert(record.endpoint()) {
                merged.push(record);
                free_count += 1;
            }
        }

        let total = merged.len();
        let mut inner = self.inner.lock();
        inner.install(merged);
        tracing::info!(
            total,
            free = free_count,
            paid = self.paid.len(),
            generation = inner.generation,
            "Proxy pool refreshed"
        );
        total
    }

    /// True when the pool is enabled but has no active entry left
    pub fn is_dry(&self) -> bool {
        self.enabled && self.stats().active == 0
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        let blacklisted = inner
            .entries
            .iter()
            .filter(|e| e.status == ProxyStatus::Blacklisted)
            .count();
        PoolStats {
            total: inner.entries.len(),
            active: inner.entries.len() - blacklisted,
            blacklisted,
            leased: inner.leased.values().sum(),
            generation: inner.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxySourceError;
    use async_trait::async_trait;

    struct StaticSource(Vec<&'static str>);

    #[async_trait]
    impl ProxySource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch(
            &self,
            _client: &reqwest::Client,
        ) -> Result<Vec<ProxyRecord>, ProxySourceError> {
            Ok(self
                .0
                .iter()
                .map(|s| ProxyRecord::parse(s, ProxyOrigin::Free).unwrap())
                .collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ProxySource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch(
            &self,
            _client: &reqwest::Client,
        ) -> Result<Vec<ProxyRecord>, ProxySourceError> {
            Err(ProxySourceError::InvalidEntry("boom".to_string()))
        }
    }

    fn paid(entries: &[&str]) -> Vec<ProxyRecord> {
        entries
            .iter()
            .map(|s| ProxyRecord::parse(s, ProxyOrigin::Paid).unwrap())
            .collect()
    }

    #[test]
    fn test_disabled_pool_fetches_directly() {
        let pool = ProxyPool::disabled().unwrap();
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let pool = ProxyPool::with_sources(true, Vec::new(), Vec::new(), 10).unwrap();
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_prefers_unleased_entries() {
        let pool =
            ProxyPool::with_sources(true, paid(&["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"]), Vec::new(), 10)
                .unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        let distinct: HashSet<_> = [a.endpoint(), b.endpoint(), c.endpoint()].into_iter().collect();
        assert_eq!(distinct.len(), 3);

        // All leased: sharing is allowed
        assert!(pool.acquire().is_some());

        pool.release(&b);
        pool.release(&a);
        let next = pool.acquire().unwrap();
        assert!(next.endpoint() == a.endpoint() || next.endpoint() == b.endpoint());
    }

    #[test]
    fn test_blacklisted_proxy_never_returned() {
        let pool =
            ProxyPool::with_sources(true, paid(&["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"]), Vec::new(), 10)
                .unwrap();

        let bad = pool.acquire().unwrap();
        assert!(pool.blacklist(&bad));
        assert!(!pool.blacklist(&bad));

        for _ in 0..30 {
            let p = pool.acquire().unwrap();
            assert_ne!(p.endpoint(), bad.endpoint());
            pool.release(&p);
        }

        let stats = pool.stats();
        assert_eq!(stats.blacklisted, 1);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.leased, 0);
    }

    #[test]
    fn test_fully_blacklisted_pool_returns_none() {
        let pool = ProxyPool::with_sources(true, paid(&["1.1.1.1:80"]), Vec::new(), 10).unwrap();
        let only = pool.acquire().unwrap();
        pool.blacklist(&only);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_dry_once_every_entry_is_blacklisted() {
        let pool =
            ProxyPool::with_sources(true, paid(&["1.1.1.1:80", "2.2.2.2:80"]), Vec::new(), 10).unwrap();
        assert!(!pool.is_dry());

        let first = pool.acquire().unwrap();
        pool.blacklist(&first);
        assert!(!pool.is_dry());

        let second = pool.acquire().unwrap();
        pool.blacklist(&second);
        assert!(pool.is_dry());

        assert!(!ProxyPool::disabled().unwrap().is_dry());
    }

    #[tokio::test]
    async fn test_refresh_revives_dry_pool() {
        let pool = ProxyPool::with_sources(true, paid(&["1.1.1.1:80"]), Vec::new(), 10).unwrap();
        let only = pool.acquire().unwrap();
        pool.blacklist(&only);
        assert!(pool.is_dry());

        pool.refresh().await;
        assert!(!pool.is_dry());
        assert!(pool.acquire().is_some());
    }

    #[tokio::test]
    async fn test_refresh_merges_and_caps_free() {
        let pool = ProxyPool::with_sources(
            true,
            paid(&["9.9.9.9:80"]),
            vec![Box::new(StaticSource(vec![
                "9.9.9.9:80",
                "1.1.1.1:80",
                "2.2.2.2:80",
                "3.3.3.3:80",
            ]))],
            2,
        )
        .unwrap();

        let total = pool.refresh().await;
        assert_eq!(total, 3);
        assert_eq!(pool.stats().generation, 2);
    }

    #[tokio::test]
    async fn test_refresh_clears_blacklist_and_ignores_stale() {
        let pool = ProxyPool::with_sources(
            true,
            Vec::new(),
            vec![Box::new(StaticSource(vec!["1.1.1.1:80"]))],
            10,
        )
        .unwrap();
        pool.refresh().await;

        let old = pool.acquire().unwrap();
        pool.blacklist(&old);
        assert!(pool.acquire().is_none());

        pool.refresh().await;
        // Stale record from the previous generation has no effect
        assert!(!pool.blacklist(&old));
        pool.release(&old);

        let fresh = pool.acquire().unwrap();
        assert_eq!(fresh.endpoint(), old.endpoint());
        assert_ne!(fresh.generation, old.generation);
    }

    #[tokio::test]
    async fn test_refresh_keeps_pool_when_all_sources_fail() {
        let pool = ProxyPool::with_sources(
            true,
            paid(&["1.1.1.1:80", "2.2.2.2:80"]),
            vec![Box::new(FailingSource)],
            10,
        )
        .unwrap();
        let leased = pool.acquire().unwrap();
        pool.blacklist(&leased);

        let before = pool.stats();
        let total = pool.refresh().await;
        let after = pool.stats();

        assert_eq!(total, 2);
        assert_eq!(before, after);
    }
}
