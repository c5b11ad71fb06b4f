//! Request spacing and `Retry-After` handling.
//!
//! Every uncached request waits for the [`ThrottleGate`] permit via
//! `until_ready()`, which keeps at least the configured interval between
//! network calls. A 429 is honored by sleeping the server-provided duration
//! one second at a time so progress can be reported.

use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// dblp asks for no more than one request every two seconds.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Used when an HTTP-date `Retry-After` is returned.
const HTTP_DATE_WAIT: Duration = Duration::from_secs(5);

/// Minimum-interval gate shared by all network calls of a run.
pub struct ThrottleGate {
    /// `None` when the interval is zero (no throttling).
    limiter: Option<DirectLimiter>,
    min_interval: Duration,
}

impl ThrottleGate {
    pub fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval).map(DirectLimiter::direct);
        Self {
            limiter,
            min_interval,
        }
    }

    /// Wait until a request is allowed.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Wait to use when a 429 carries no usable `Retry-After`.
    pub fn fallback_wait(&self) -> Duration {
        self.min_interval.max(Duration::from_secs(1))
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date (e.g. "Wed, 21 Oct 2015 07:28:00 GMT"): fixed conservative wait
    if value.contains(',') || value.contains("GMT") {
        return Some(HTTP_DATE_WAIT);
    }
    None
}

/// Sleep for `total`, calling `on_tick(remaining)` before each whole second.
pub async fn wait_with_countdown(total: Duration, mut on_tick: impl FnMut(Duration)) {
    let one_second = Duration::from_secs(1);
    let mut remaining = total;
    while remaining >= one_second {
        on_tick(remaining);
        tokio::time::sleep(one_second).await;
        remaining -= one_second;
    }
    if !remaining.is_zero() {
        on_tick(remaining);
        tokio::time::sleep(remaining).await;
    }
}
