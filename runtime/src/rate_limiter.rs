//! Sliding-window rate limiting per client.
//!
//! Each client key (usually the caller's IP address) keeps the timestamps of
//! its admitted requests. A request is admitted while fewer than
//! `max_requests` timestamps are younger than `window`; rejected requests are
//! not recorded, so a client hammering a closed window does not extend it.
//!
//! The retry hint is always the full window length rounded up to whole
//! seconds, not the time until the oldest entry expires.
//!
//! # Example
//!
//! ```
//! use event_relay_runtime::rate_limiter::{Admission, RateLimiterConfig, SlidingWindowRateLimiter};
//! use std::time::{Duration, Instant};
//!
//! let limiter = SlidingWindowRateLimiter::new(RateLimiterConfig {
//!     max_requests: 2,
//!     window: Duration::from_secs(60),
//! });
//! let now = Instant::now();
//!
//! assert!(limiter.admit("10.0.0.1", now).is_admitted());
//! assert!(limiter.admit("10.0.0.1", now).is_admitted());
//! assert_eq!(
//!     limiter.admit("10.0.0.1", now),
//!     Admission::Rejected { retry_after_secs: 60 }
//! );
//! ```

use crate::metrics::RateLimitMetrics;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per client within one window
    pub max_requests: usize,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_millis(60_000),
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed and has been recorded
    Admitted,
    /// The client is over its limit
    Rejected {
        /// Seconds the client should wait before retrying
        retry_after_secs: u64,
    },
}

impl Admission {
    /// Whether the request was admitted.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Per-client sliding-window rate limiter.
///
/// Shared between request handlers behind an `Arc`; one mutex guards the whole
/// table so a check-and-record is atomic per client.
#[derive(Debug, Default)]
pub struct SlidingWindowRateLimiter {
    config: RateLimiterConfig,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    /// Create a limiter.
    ///
    /// A `max_requests` of zero rejects every request.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Seconds reported to rejected clients: the window rounded up.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let millis = u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1000)
    }

    /// Check and record a request from `client` at `now`.
    ///
    /// Entries at or before `now - window` are evicted first; a request is
    /// admitted when fewer than `max_requests` remain.
    pub fn admit(&self, client: &str, now: Instant) -> Admission {
        let mut table = self.lock();
        let entries = table.entry(client.to_owned()).or_default();

        if let Some(cutoff) = now.checked_sub(self.config.window) {
            while entries.front().is_some_and(|&t| t <= cutoff) {
                entries.pop_front();
            }
        }

        if entries.len() >= self.config.max_requests {
            drop(table);
            RateLimitMetrics::record_rejection();
            tracing::warn!(client, "Rate limit exceeded");
            return Admission::Rejected {
                retry_after_secs: self.retry_after_secs(),
            };
        }

        entries.push_back(now);
        Admission::Admitted
    }

    /// Check and record a request from `client` now.
    pub fn check(&self, client: &str) -> Admission {
        self.admit(client, Instant::now())
    }

    /// Drop clients with no entries younger than the window.
    ///
    /// Returns the number of clients removed.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(self.config.window) else {
            return 0;
        };
        let mut table = self.lock();
        let before = table.len();
        table.retain(|_, entries| entries.back().is_some_and(|&t| t > cutoff));
        before - table.len()
    }

    /// Number of clients currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter(max_requests: usize, window_ms: u64) -> SlidingWindowRateLimiter {
        SlidingWindowRateLimiter::new(RateLimiterConfig {
            max_requests,
            window: Duration::from_millis(window_ms),
        })
    }

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = limiter(100, 60_000);
        let start = Instant::now();

        for i in 0..100 {
            let now = start + Duration::from_millis(i * 10);
            assert!(limiter.admit("10.0.0.1", now).is_admitted());
        }

        assert_eq!(
            limiter.admit("10.0.0.1", start + Duration::from_millis(1000)),
            Admission::Rejected {
                retry_after_secs: 60
            }
        );
    }

    #[test]
    fn hundred_per_minute_boundary() {
        let limiter = limiter(100, 60_000);
        let start = Instant::now();

        for _ in 0..100 {
            assert!(limiter.admit("10.0.0.1", start).is_admitted());
        }

        // 101st request, still inside the window
        assert_eq!(
            limiter.admit("10.0.0.1", start + Duration::from_millis(59_999)),
            Admission::Rejected {
                retry_after_secs: 60
            }
        );

        // Window fully elapsed: the original entries sit exactly at `now - window`
        let after = start + Duration::from_millis(60_000);
        assert!(limiter.admit("10.0.0.1", after).is_admitted());
        for _ in 1..100 {
            assert!(limiter.admit("10.0.0.1", after).is_admitted());
        }
        assert!(!limiter.admit("10.0.0.1", after).is_admitted());
    }

    #[test]
    fn window_slides() {
        let limiter = limiter(2, 1000);
        let start = Instant::now();

        assert!(limiter.admit("c", start).is_admitted());
        assert!(limiter.admit("c", start + Duration::from_millis(500)).is_admitted());
        assert!(!limiter.admit("c", start + Duration::from_millis(900)).is_admitted());

        // First entry is exactly one window old: evicted
        assert!(limiter.admit("c", start + Duration::from_millis(1000)).is_admitted());
        assert!(!limiter.admit("c", start + Duration::from_millis(1200)).is_admitted());
    }

    #[test]
    fn clients_are_independent() {
        let limiter = limiter(1, 60_000);
        let now = Instant::now();

        assert!(limiter.admit("a", now).is_admitted());
        assert!(!limiter.admit("a", now).is_admitted());
        assert!(limiter.admit("b", now).is_admitted());
    }

    #[test]
    fn rejections_are_not_recorded() {
        let limiter = limiter(1, 1000);
        let start = Instant::now();

        assert!(limiter.admit("c", start).is_admitted());
        for ms in [100, 200, 900] {
            assert!(!limiter.admit("c", start + Duration::from_millis(ms)).is_admitted());
        }
        assert!(limiter.admit("c", start + Duration::from_millis(1001)).is_admitted());
    }

    #[test]
    fn retry_after_rounds_window_up() {
        assert_eq!(limiter(1, 1500).retry_after_secs(), 2);
        assert_eq!(limiter(1, 60_000).retry_after_secs(), 60);
        assert_eq!(limiter(1, 1).retry_after_secs(), 1);
    }

    #[test]
    fn zero_limit_rejects_everything() {
        let limiter = limiter(0, 1000);
        assert!(!limiter.check("c").is_admitted());
    }

    #[test]
    fn purge_idle_drops_stale_clients() {
        let limiter = limiter(5, 1000);
        let start = Instant::now();
        limiter.admit("old", start);
        limiter.admit("fresh", start + Duration::from_millis(800));

        assert_eq!(limiter.purge_idle(start + Duration::from_millis(1500)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    proptest! {
        #[test]
        fn never_admits_more_than_limit_per_window(
            max in 1usize..10,
            offsets in prop::collection::vec(0u64..5000, 1..200),
        ) {
            let limiter = limiter(max, 1000);
            let start = Instant::now();
            let mut sorted = offsets;
            sorted.sort_unstable();

            let mut admitted: Vec<u64> = Vec::new();
            for ms in sorted {
                if limiter.admit("c", start + Duration::from_millis(ms)).is_admitted() {
                    admitted.push(ms);
                }
            }

            for (i, &t) in admitted.iter().enumerate() {
                let in_window = admitted[i..].iter().take_while(|&&u| u < t + 1000).count();
                prop_assert!(in_window <= max);
            }
        }
    }
}
