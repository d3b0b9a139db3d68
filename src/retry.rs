//! Retry conditions and policies.
//!
//! A [`RetryPolicy`] pairs a [`RetryCondition`] (should we try again?) with a
//! [`BackoffStrategy`] (how long to wait first). Both are consulted once per failed
//! attempt with a fresh [`RetryPolicyContext`]. A mandatory
//! [`MaxRetriesCondition`] is always ANDed with the configured condition, so no
//! composition can retry forever.

use crate::backoff::{Backoff, BackoffStrategy};
use crate::rate_limit::RateLimitConfig;
use crate::{Error, ErrorType, Result};
use http::StatusCode;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Status codes the default condition retries.
pub const RETRYABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// An immutable snapshot of a failed attempt, handed to every retry decision.
#[derive(Clone, Copy)]
pub struct RetryPolicyContext<'a> {
    request: &'a (dyn Any + Send + Sync),
    error: &'a Error,
    retries_attempted: u32,
    status: Option<StatusCode>,
}

impl<'a> RetryPolicyContext<'a> {
    pub fn new<R>(
        request: &'a R,
        error: &'a Error,
        retries_attempted: u32,
        status: Option<StatusCode>,
    ) -> Self
    where
        R: Any + Send + Sync,
    {
        Self {
            request,
            error,
            retries_attempted,
            status,
        }
    }

    /// The original request, if it is an `R`.
    pub fn request<R: Any>(&self) -> Option<&'a R> {
        self.request.downcast_ref::<R>()
    }

    /// The error of the most recent attempt.
    pub fn error(&self) -> &'a Error {
        self.error
    }

    /// Retries already attempted; 0 on the first failure.
    pub fn retries_attempted(&self) -> u32 {
        self.retries_attempted
    }

    /// The status code of the most recent attempt, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

impl fmt::Debug for RetryPolicyContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicyContext")
            .field("error", self.error)
            .field("retries_attempted", &self.retries_attempted)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Decides whether a failed attempt should be retried.
///
/// Conditions are pure predicates over the context. Closures taking a
/// [`RetryPolicyContext`] are conditions too.
///
/// # Examples
///
/// ```
/// use callcore::retry::{RetryCondition, RetryPolicyContext};
///
/// struct RetryOnConflict;
///
/// impl RetryCondition for RetryOnConflict {
///     fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
///         context.status().is_some_and(|s| s.as_u16() == 409)
///     }
/// }
/// ```
pub trait RetryCondition: Send + Sync {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool;
}

impl<F> RetryCondition for F
where
    F: Fn(&RetryPolicyContext<'_>) -> bool + Send + Sync,
{
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        self(context)
    }
}

/// Allows retries until `max_retries` have been attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxRetriesCondition {
    max_retries: u32,
}

impl MaxRetriesCondition {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `max_retries` is negative.
    ///
    /// # Examples
    ///
    /// ```
    /// use callcore::retry::MaxRetriesCondition;
    ///
    /// assert!(MaxRetriesCondition::new(3).is_ok());
    /// assert!(MaxRetriesCondition::new(-1).is_err());
    /// ```
    pub fn new(max_retries: i32) -> Result<Self> {
        let max_retries = u32::try_from(max_retries).map_err(|_| {
            Error::Configuration(format!(
                "max_retries must not be negative, got {max_retries}"
            ))
        })?;
        Ok(Self { max_retries })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl RetryCondition for MaxRetriesCondition {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        context.retries_attempted() < self.max_retries
    }
}

/// Retries service errors of the given classifications.
#[derive(Debug, Clone)]
pub struct RetryOnErrorTypes(pub Vec<ErrorType>);

impl RetryCondition for RetryOnErrorTypes {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        context
            .error()
            .error_type()
            .is_some_and(|error_type| self.0.contains(&error_type))
    }
}

/// Retries attempts that ended with one of the given status codes.
#[derive(Debug, Clone)]
pub struct RetryOnStatusCodes(pub Vec<StatusCode>);

impl RetryCondition for RetryOnStatusCodes {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        context
            .status()
            .is_some_and(|status| self.0.contains(&status))
    }
}

/// Retries transport failures (connection errors, timeouts).
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTransportError;

impl RetryCondition for RetryOnTransportError {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        matches!(context.error(), Error::Transport { .. })
    }
}

/// Retries every error marked retryable by [`Error::is_retryable`].
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryCondition for RetryOnRetryable {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        context.error().is_retryable()
    }
}

/// Retries if ANY of the conditions does.
pub struct OrCondition {
    conditions: Vec<Box<dyn RetryCondition>>,
}

impl OrCondition {
    pub fn new(conditions: Vec<Box<dyn RetryCondition>>) -> Self {
        Self { conditions }
    }
}

impl RetryCondition for OrCondition {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        self.conditions.iter().any(|c| c.should_retry(context))
    }
}

/// Retries only if ALL of the conditions do.
///
/// # Examples
///
/// ```
/// use callcore::retry::{AndCondition, RetryOnTransportError, RetryPolicyContext};
///
/// // Transport failures only, never after a response was received.
/// let condition = AndCondition::new(vec![
///     Box::new(RetryOnTransportError),
///     Box::new(|context: &RetryPolicyContext<'_>| context.status().is_none()),
/// ]);
/// ```
pub struct AndCondition {
    conditions: Vec<Box<dyn RetryCondition>>,
}

impl AndCondition {
    pub fn new(conditions: Vec<Box<dyn RetryCondition>>) -> Self {
        Self { conditions }
    }
}

impl RetryCondition for AndCondition {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        self.conditions.iter().all(|c| c.should_retry(context))
    }
}

/// The condition used when none is configured: service and throttling errors, the
/// [`RETRYABLE_STATUS_CODES`] and transport failures.
pub fn default_condition() -> OrCondition {
    OrCondition::new(vec![
        Box::new(RetryOnErrorTypes(vec![ErrorType::Service, ErrorType::Throttling])),
        Box::new(RetryOnStatusCodes(RETRYABLE_STATUS_CODES.to_vec())),
        Box::new(RetryOnTransportError),
    ])
}

/// Decides, attempt by attempt, whether to retry and how long to wait.
///
/// # Examples
///
/// ```
/// use callcore::backoff::Backoff;
/// use callcore::retry::{RetryOnTransportError, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> callcore::Result<()> {
/// let policy = RetryPolicy::builder()
///     .max_retries(5)
///     .condition(RetryOnTransportError)
///     .backoff(Backoff::Fixed(Duration::from_millis(250)))
///     .build()?;
/// assert_eq!(policy.max_retries(), 5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: MaxRetriesCondition,
    condition: Arc<dyn RetryCondition>,
    backoff: Arc<dyn BackoffStrategy>,
    throttling_backoff: Arc<dyn BackoffStrategy>,
    rate_limit_config: RateLimitConfig,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: MaxRetriesCondition { max_retries: 0 },
            condition: Arc::new(default_condition()),
            backoff: Arc::new(Backoff::None),
            throttling_backoff: Arc::new(Backoff::None),
            rate_limit_config: RateLimitConfig::disabled(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.max_retries()
    }

    /// Whether the failed attempt described by `context` should be retried.
    pub fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        self.max_retries.should_retry(context) && self.condition.should_retry(context)
    }

    /// The wait before retrying the attempt described by `context`.
    ///
    /// Rate limit hints from the server win when the rate limit config allows them;
    /// throttling errors use the throttling backoff; everything else the regular one.
    pub fn compute_delay(&self, context: &RetryPolicyContext<'_>) -> Duration {
        let error = context.error();
        if let Some(delay) = error
            .service_error()
            .and_then(|err| err.rate_limit_info())
            .and_then(|info| info.recommended_delay(&self.rate_limit_config))
        {
            tracing::info!(
                rate_limit_delay_ms = delay.as_millis(),
                retries_attempted = context.retries_attempted(),
                "Rate limited - honoring server-suggested delay"
            );
            return delay;
        }

        if error.error_type() == Some(ErrorType::Throttling) {
            self.throttling_backoff.compute_delay(context)
        } else {
            self.backoff.compute_delay(context)
        }
    }
}

impl Default for RetryPolicy {
    /// Three retries of service, throttling and transport failures with jittered
    /// exponential backoff.
    fn default() -> Self {
        Self {
            max_retries: MaxRetriesCondition {
                max_retries: DEFAULT_MAX_RETRIES as u32,
            },
            condition: Arc::new(default_condition()),
            backoff: Arc::new(Backoff::standard()),
            throttling_backoff: Arc::new(Backoff::throttled()),
            rate_limit_config: RateLimitConfig::default(),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries())
            .field("rate_limit_config", &self.rate_limit_config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryPolicy`]. Unset pieces take the [`RetryPolicy::default`] values.
pub struct RetryPolicyBuilder {
    max_retries: i32,
    condition: Option<Arc<dyn RetryCondition>>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    throttling_backoff: Option<Arc<dyn BackoffStrategy>>,
    rate_limit_config: Option<RateLimitConfig>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            condition: None,
            backoff: None,
            throttling_backoff: None,
            rate_limit_config: None,
        }
    }

    /// Sets the maximum number of retries. Validated by [`build`](Self::build).
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the condition ANDed with the max-retries gate.
    pub fn condition(mut self, condition: impl RetryCondition + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// Sets the backoff used for errors classified as throttling.
    pub fn throttling_backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.throttling_backoff = Some(Arc::new(backoff));
        self
    }

    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = Some(config);
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the maximum number of retries is negative.
    pub fn build(self) -> Result<RetryPolicy> {
        let max_retries = MaxRetriesCondition::new(self.max_retries)?;
        let default = RetryPolicy::default();

        Ok(RetryPolicy {
            max_retries,
            condition: self.condition.unwrap_or(default.condition),
            backoff: self.backoff.unwrap_or(default.backoff),
            throttling_backoff: self
                .throttling_backoff
                .unwrap_or(default.throttling_backoff),
            rate_limit_config: self
                .rate_limit_config
                .unwrap_or(default.rate_limit_config),
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
