//! Rate limit hints carried by error responses.
//!
//! The classifier parses these headers from every error response and attaches them to
//! the resulting [`ServiceError`](crate::ServiceError). The retry policy then prefers the
//! server's suggested wait over its own backoff when [`RateLimitConfig`] allows it.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Rate limit information extracted from response headers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RateLimitInfo {
    /// When the rate limit window resets (`X-RateLimit-Reset` / `RateLimit-Reset`).
    pub reset_at: Option<SystemTime>,

    /// How long the server asked us to wait (`Retry-After`).
    pub retry_after: Option<Duration>,

    /// Requests remaining in the current window (`X-RateLimit-Remaining`).
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Extracts rate limit information from response headers.
    ///
    /// Understands `Retry-After` (delay-seconds or HTTP date), `X-RateLimit-Reset` and
    /// `RateLimit-Reset` (Unix timestamps) and `X-RateLimit-Remaining`.
    ///
    /// # Examples
    ///
    /// ```
    /// use callcore::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "60".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert!(info.retry_after.is_some());
    /// assert!(info.is_rate_limited());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            reset_at: parse_reset(headers),
            retry_after: parse_retry_after(headers),
            remaining: header_str(headers, "x-ratelimit-remaining").and_then(|v| v.parse().ok()),
        }
    }

    /// Returns `true` if no header was recognized.
    pub fn is_empty(&self) -> bool {
        self.reset_at.is_none() && self.retry_after.is_none() && self.remaining.is_none()
    }

    /// Returns `true` if the server signalled an active limit: an explicit
    /// `Retry-After`, or no requests remaining in the window.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.remaining == Some(0)
    }

    /// Returns the server-suggested delay capped by `max_wait`.
    ///
    /// `Retry-After` wins over the reset timestamp. A reset time in the past yields
    /// `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }
        self.delay_until_reset(max_wait)
    }

    /// Returns the delay the policy should honor under `config`, if any.
    pub fn recommended_delay(&self, config: &RateLimitConfig) -> Option<Duration> {
        if !config.enabled {
            return None;
        }
        if config.respect_retry_after {
            self.delay(config.max_wait)
        } else {
            self.delay_until_reset(config.max_wait)
        }
    }

    fn delay_until_reset(&self, max_wait: Duration) -> Option<Duration> {
        let until_reset = self.reset_at?.duration_since(SystemTime::now()).ok()?;
        Some(until_reset.min(max_wait))
    }
}

/// How the retry policy treats rate limit hints.
///
/// # Examples
///
/// ```
/// use callcore::rate_limit::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::builder()
///     .max_wait(Duration::from_secs(60))
///     .build();
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether hinted delays replace the policy's backoff.
    pub enabled: bool,

    /// Upper bound on a hinted delay. Defaults to 5 minutes.
    pub max_wait: Duration,

    /// Whether `Retry-After` is honored. When `false` only reset timestamps count.
    pub respect_retry_after: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait: Duration::from_secs(300),
            respect_retry_after: true,
        }
    }
}

impl RateLimitConfig {
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// A configuration that ignores every hint.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Debug, Default)]
pub struct RateLimitConfigBuilder {
    enabled: Option<bool>,
    max_wait: Option<Duration>,
    respect_retry_after: Option<bool>,
}

impl RateLimitConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = Some(respect);
        self
    }

    pub fn build(self) -> RateLimitConfig {
        let default = RateLimitConfig::default();
        RateLimitConfig {
            enabled: self.enabled.unwrap_or(default.enabled),
            max_wait: self.max_wait.unwrap_or(default.max_wait),
            respect_retry_after: self
                .respect_retry_after
                .unwrap_or(default.respect_retry_after),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = header_str(headers, "retry-after")?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    // A date in the past means "retry now".
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

fn parse_reset(headers: &HeaderMap) -> Option<SystemTime> {
    ["x-ratelimit-reset", "ratelimit-reset"]
        .iter()
        .filter_map(|name| header_str(headers, name))
        .find_map(|value| value.trim().parse::<u64>().ok())
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}
