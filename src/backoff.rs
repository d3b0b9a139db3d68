//! Backoff strategies: how long to wait before the next attempt.

use crate::retry::RetryPolicyContext;
use rand::Rng;
use std::time::Duration;

/// Base delay of the default backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Base delay of the default backoff for throttled requests.
pub const DEFAULT_THROTTLED_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound of the default backoffs.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Computes the wait before the next attempt.
///
/// Implementations must be pure functions of the context: no counters of their own.
/// Closures taking a [`RetryPolicyContext`] are strategies too.
pub trait BackoffStrategy: Send + Sync {
    fn compute_delay(&self, context: &RetryPolicyContext<'_>) -> Duration;
}

impl<F> BackoffStrategy for F
where
    F: Fn(&RetryPolicyContext<'_>) -> Duration + Send + Sync,
{
    fn compute_delay(&self, context: &RetryPolicyContext<'_>) -> Duration {
        self(context)
    }
}

/// The built-in backoff strategies.
///
/// # Examples
///
/// ```
/// use callcore::backoff::Backoff;
/// use std::time::Duration;
///
/// // 100ms, 200ms, 400ms, ... capped at 10s
/// let exponential = Backoff::Exponential {
///     base_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(10),
///     jitter: false,
/// };
/// assert_eq!(exponential.delay_for_retry(2), Duration::from_millis(400));
///
/// let fixed = Backoff::Fixed(Duration::from_secs(1));
/// assert_eq!(fixed.delay_for_retry(7), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,

    /// Wait the same delay before every retry.
    Fixed(Duration),

    /// Double the delay with every retry.
    ///
    /// The delay before retry `n` (0-indexed) is `base_delay * 2^n`, capped at
    /// `max_delay`. With jitter, a random 50–100% of that delay is used.
    Exponential {
        /// The delay before the first retry.
        base_delay: Duration,
        /// The maximum delay between attempts.
        max_delay: Duration,
        /// Whether to randomize delays (recommended).
        jitter: bool,
    },

    /// Custom delays, keyed by the number of retries already attempted.
    Custom(fn(retries_attempted: u32) -> Duration),
}

impl Backoff {
    /// The default exponential backoff with jitter.
    pub fn standard() -> Self {
        Backoff::Exponential {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_BACKOFF,
            jitter: true,
        }
    }

    /// The default exponential backoff for throttled requests.
    pub fn throttled() -> Self {
        Backoff::Exponential {
            base_delay: DEFAULT_THROTTLED_BASE_DELAY,
            max_delay: DEFAULT_MAX_BACKOFF,
            jitter: true,
        }
    }

    /// Returns the delay before the next attempt when `retries_attempted` retries have
    /// already been made.
    pub fn delay_for_retry(&self, retries_attempted: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                base_delay,
                max_delay,
                jitter,
            } => {
                let multiplier = 2u32.saturating_pow(retries_attempted);
                let delay = base_delay.saturating_mul(multiplier).min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    delay.mul_f64(jitter_factor)
                } else {
                    delay
                }
            }
            Backoff::Custom(delay_fn) => delay_fn(retries_attempted),
        }
    }
}

impl BackoffStrategy for Backoff {
    fn compute_delay(&self, context: &RetryPolicyContext<'_>) -> Duration {
        self.delay_for_retry(context.retries_attempted())
    }
}
