//! Retry and backoff control
//!
//! A failed attempt is never retried in place. The controller records the
//! failure, blacklists the proxy it used, draws a new identity and tells the
//! coordinator how long to wait before the next try. The wait itself lives in
//! the scheduler's delayed queue.

use super::classifier::Classification;
use crate::config::RetryConfig;
use crate::identity::IdentityPool;
use crate::proxy::ProxyPool;
use crate::state::FetchAttempt;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Jittered exponential backoff
///
/// The nominal delay for attempt `n` is `min(max, base * 2^(n-1))`. It is
/// perturbed uniformly within `±jitter * nominal` and floored at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    /// Delay before jitter for a 1-based attempt number
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay for an attempt with a random jitter sample
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with(attempt, unit)
    }

    /// Delay for an attempt with an explicit jitter sample in `[-1, 1]`
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let nominal = self.nominal(attempt).as_secs_f64();
        let offset = unit.clamp(-1.0, 1.0) * self.jitter * nominal;
        Duration::from_secs_f64((nominal + offset).max(0.0))
    }

    /// Largest delay any attempt can produce
    pub fn ceiling(&self) -> Duration {
        self.max.mul_f64(1.0 + self.jitter)
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    SoftBlocked,
    RateLimited,
    ServerError,
    Unauthorized,
    /// Connect, DNS, TLS, timeout or body read error
    TransportFailure,
}

impl FailureClass {
    /// Failure class for a non-valid classification
    pub fn from_classification(classification: Classification) -> Option<Self> {
        match classification {
            Classification::Valid => None,
            Classification::SoftBlocked => Some(FailureClass::SoftBlocked),
            Classification::RateLimited => Some(FailureClass::RateLimited),
            Classification::ServerError => Some(FailureClass::ServerError),
            Classification::Unauthorized => Some(FailureClass::Unauthorized),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::SoftBlocked => "soft_blocked",
            FailureClass::RateLimited => "rate_limited",
            FailureClass::ServerError => "server_error",
            FailureClass::Unauthorized => "unauthorized",
            FailureClass::TransportFailure => "transport_failure",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        rotate_fingerprint: bool,
    },
    GiveUp,
}

/// Per-attempt retry state machine
pub struct RetryController {
    backoff: Backoff,
    /// 0 retries forever
    max_attempts: u32,
    think_chance: f64,
    think_min: Duration,
    think_max: Duration,
    proxies: Arc<ProxyPool>,
    identities: Arc<IdentityPool>,
}

impl RetryController {
    pub fn new(config: &RetryConfig, proxies: Arc<ProxyPool>, identities: Arc<IdentityPool>) -> Self {
        Self {
            backoff: Backoff::from_config(config),
            max_attempts: config.max_attempts,
            think_chance: config.think_chance.clamp(0.0, 1.0),
            think_min: Duration::from_millis(config.think_min_ms),
            think_max: Duration::from_millis(config.think_max_ms.max(config.think_min_ms)),
            proxies,
            identities,
        }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Handles a failed try of `attempt`
    ///
    /// The attempt's proxy is blacklisted in every case. Unless the attempt has
    /// used up `max_attempts`, its count is bumped and it gets a new identity,
    /// with a different fingerprint when the server answered 401.
    pub fn on_failure(&self, attempt: &mut FetchAttempt, failure: FailureClass) -> RetryDecision {
        attempt.last_failure = Some(failure);

        if let Some(proxy) = attempt.proxy.take() {
            self.proxies.blacklist(&proxy);
        }

        if self.max_attempts > 0 && attempt.count >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let delay = self.backoff.delay(attempt.count);
        let rotate_fingerprint = failure == FailureClass::Unauthorized;

        attempt.identity = self.identities.redraw(&attempt.identity, rotate_fingerprint);
        attempt.count += 1;

        RetryDecision::Retry {
            delay,
            rotate_fingerprint,
        }
    }

    /// Optional pause taken after a successful fetch
    pub fn on_success(&self) -> Option<Duration> {
        let mut rng = rand::thread_rng();
        if self.think_chance <= 0.0 || rng.gen::<f64>() >= self.think_chance {
            return None;
        }
        if self.think_max <= self.think_min {
            return Some(self.think_min);
        }
        Some(rng.gen_range(self.think_min..=self.think_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::proxy::{ProxyOrigin, ProxyRecord};
    use crate::state::FetchTarget;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 0.5)
    }

    fn controller(max_attempts: u32, proxies: Arc<ProxyPool>) -> RetryController {
        let config = RetryConfig {
            max_attempts,
            think_chance: 0.0,
            ..RetryConfig::default()
        };
        let identities = Arc::new(IdentityPool::new(&IdentityConfig::default(), None));
        RetryController::new(&config, proxies, identities)
    }

    fn attempt(identities: &IdentityPool) -> FetchAttempt {
        FetchAttempt::new(
            "https://example.com/en/vehicles/?page=1".to_string(),
            FetchTarget::Listing { page: 1 },
            identities.draw(true),
        )
    }

    #[test]
    fn test_nominal_doubles_until_cap() {
        let b = backoff();
        assert_eq!(b.nominal(1), Duration::from_secs(1));
        assert_eq!(b.nominal(2), Duration::from_secs(2));
        assert_eq!(b.nominal(3), Duration::from_secs(4));
        assert_eq!(b.nominal(6), Duration::from_secs(32));
        assert_eq!(b.nominal(7), Duration::from_secs(60));
        assert_eq!(b.nominal(400), Duration::from_secs(60));
    }

    #[test]
    fn test_fixed_sample_is_monotonic_and_bounded() {
        let b = backoff();
        for unit in [-1.0, -0.3, 0.0, 0.7, 1.0] {
            let mut previous = Duration::ZERO;
            for n in 1..=20 {
                let d = b.delay_with(n, unit);
                assert!(d >= previous, "attempt {} with sample {}", n, unit);
                assert!(d <= b.ceiling());
                previous = d;
            }
        }
        assert_eq!(b.delay_with(1, 1.0), Duration::from_millis(1500));
        assert_eq!(b.delay_with(1, -1.0), Duration::from_millis(500));
    }

    #[test]
    fn test_random_delay_within_jitter_band() {
        let b = backoff();
        for _ in 0..200 {
            let d = b.delay(3);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_full_jitter_floors_at_zero() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 1.0);
        assert_eq!(b.delay_with(2, -1.0), Duration::ZERO);
    }

    #[test]
    fn test_on_failure_blacklists_and_redraws() {
        let proxies = Arc::new(
            ProxyPool::with_sources(
                true,
                vec![ProxyRecord::parse("1.1.1.1:80", ProxyOrigin::Paid).unwrap()],
                Vec::new(),
                10,
            )
            .unwrap(),
        );
        let retry = controller(5, Arc::clone(&proxies));
        let identities = IdentityPool::new(&IdentityConfig::default(), None);

        let mut a = attempt(&identities);
        a.proxy = proxies.acquire();
        assert!(a.proxy.is_some());

        let decision = retry.on_failure(&mut a, FailureClass::SoftBlocked);
        assert!(matches!(
            decision,
            RetryDecision::Retry {
                rotate_fingerprint: false,
                ..
            }
        ));
        assert_eq!(a.count, 2);
        assert!(a.proxy.is_none());
        assert_eq!(a.last_failure, Some(FailureClass::SoftBlocked));
        assert_eq!(proxies.stats().blacklisted, 1);
        assert!(proxies.acquire().is_none());
    }

    #[test]
    fn test_unauthorized_rotates_fingerprint() {
        let retry = controller(5, Arc::new(ProxyPool::disabled().unwrap()));
        let identities = IdentityPool::new(&IdentityConfig::default(), None);
        let mut a = attempt(&identities);

        let decision = retry.on_failure(&mut a, FailureClass::Unauthorized);
        assert!(matches!(
            decision,
            RetryDecision::Retry {
                rotate_fingerprint: true,
                ..
            }
        ));
        let first = a.identity.fingerprint.unwrap();

        retry.on_failure(&mut a, FailureClass::Unauthorized);
        assert_ne!(a.identity.fingerprint.unwrap(), first);
    }

    #[test]
    fn test_gives_up_at_max_attempts() {
        let retry = controller(3, Arc::new(ProxyPool::disabled().unwrap()));
        let identities = IdentityPool::new(&IdentityConfig::default(), None);
        let mut a = attempt(&identities);

        assert!(matches!(
            retry.on_failure(&mut a, FailureClass::ServerError),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            retry.on_failure(&mut a, FailureClass::TransportFailure),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(a.count, 3);
        assert_eq!(
            retry.on_failure(&mut a, FailureClass::RateLimited),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_zero_max_attempts_retries_forever() {
        let retry = controller(0, Arc::new(ProxyPool::disabled().unwrap()));
        let identities = IdentityPool::new(&IdentityConfig::default(), None);
        let mut a = attempt(&identities);

        for _ in 0..100 {
            assert!(matches!(
                retry.on_failure(&mut a, FailureClass::SoftBlocked),
                RetryDecision::Retry { .. }
            ));
        }
        assert_eq!(a.count, 101);
    }

    #[test]
    fn test_think_pause() {
        let never = controller(5, Arc::new(ProxyPool::disabled().unwrap()));
        assert!(never.on_success().is_none());

        let config = RetryConfig {
            think_chance: 1.0,
            think_min_ms: 100,
            think_max_ms: 500,
            ..RetryConfig::default()
        };
        let always = RetryController::new(
            &config,
            Arc::new(ProxyPool::disabled().unwrap()),
            Arc::new(IdentityPool::new(&IdentityConfig::default(), None)),
        );
        for _ in 0..50 {
            let pause = always.on_success().unwrap();
            assert!(pause >= Duration::from_millis(100) && pause <= Duration::from_millis(500));
        }
    }
}
