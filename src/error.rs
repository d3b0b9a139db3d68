//! Error types for service calls.
//!
//! Failures fall into two layers. [`ServiceError`] is the typed, metadata-rich error a
//! remote service produced (or that the classifier synthesized from a raw response).
//! [`Error`] is the crate-wide failure type: it wraps service errors and adds the
//! failures that never reached a service, such as transport errors, unparseable bodies
//! and cancellation.

use crate::rate_limit::RateLimitInfo;
use http::StatusCode;
use std::fmt;

/// A boxed error from an arbitrary transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Who is considered responsible for a service error.
///
/// The classification drives retry eligibility: the default retry condition retries
/// [`ErrorType::Service`] and [`ErrorType::Throttling`] errors and leaves the rest alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorType {
    /// The caller's request was malformed, unauthorized or too large.
    Client,
    /// The remote service failed to handle a valid request.
    Service,
    /// The remote service rejected the request because of rate limiting.
    Throttling,
    /// The classification could not be determined.
    #[default]
    Unknown,
}

impl ErrorType {
    /// Returns the canonical name of this classification.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorType::Client => "Client",
            ErrorType::Service => "Service",
            ErrorType::Throttling => "Throttling",
            ErrorType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by, or synthesized on behalf of, a remote service.
///
/// Instances are assembled through [`ServiceErrorBuilder`]. Whoever owns the builder
/// (an error parser, then the classifier) may fill in fields; once [`build`] hands the
/// value back, it is read-only.
///
/// [`build`]: ServiceErrorBuilder::build
///
/// # Examples
///
/// ```
/// use callcore::{ErrorType, ServiceError};
/// use http::StatusCode;
///
/// let err = ServiceError::builder("Rate exceeded")
///     .error_code("ThrottlingException")
///     .error_type(ErrorType::Throttling)
///     .status(StatusCode::TOO_MANY_REQUESTS)
///     .build();
///
/// assert_eq!(err.error_code(), Some("ThrottlingException"));
/// assert_eq!(err.error_type(), ErrorType::Throttling);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceError {
    message: String,
    status: Option<StatusCode>,
    error_code: Option<String>,
    error_type: ErrorType,
    service_name: Option<String>,
    request_id: Option<String>,
    rate_limit_info: Option<RateLimitInfo>,
}

impl ServiceError {
    /// Starts building a service error with the given message.
    pub fn builder(message: impl Into<String>) -> ServiceErrorBuilder {
        ServiceErrorBuilder {
            inner: ServiceError {
                message: message.into(),
                status: None,
                error_code: None,
                error_type: ErrorType::Unknown,
                service_name: None,
                request_id: None,
                rate_limit_info: None,
            },
        }
    }

    /// Reopens this error for enrichment, transferring ownership to the builder.
    pub fn into_builder(self) -> ServiceErrorBuilder {
        ServiceErrorBuilder { inner: self }
    }

    /// The human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The HTTP status code of the response that produced this error.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The service-assigned error code, e.g. `ThrottlingException`.
    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// The logical name of the service that produced this error.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// The service-assigned request identifier, when the response carried one.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Rate limit hints parsed from the response headers.
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        self.rate_limit_info.as_ref()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Service: ", self.message)?;
        f.write_str(self.service_name.as_deref().unwrap_or("unknown"))?;
        match self.status {
            Some(status) => write!(f, ", Status Code: {}", status.as_u16())?,
            None => f.write_str(", Status Code: unknown")?,
        }
        if let Some(code) = &self.error_code {
            write!(f, ", Error Code: {code}")?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, ", Request ID: {request_id}")?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for ServiceError {}

crate::modeled_fields!(ServiceError {
    "Message" => message,
    "StatusCode" => status,
    "ErrorCode" => error_code,
    "ErrorType" => error_type,
    "ServiceName" => service_name,
    "RequestId" => request_id,
});

/// Builder for [`ServiceError`].
#[derive(Debug, Clone)]
pub struct ServiceErrorBuilder {
    inner: ServiceError,
}

impl ServiceErrorBuilder {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.inner.message = message.into();
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.inner.status = Some(status);
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.inner.error_code = Some(code.into());
        self
    }

    pub fn error_type(mut self, error_type: ErrorType) -> Self {
        self.inner.error_type = error_type;
        self
    }

    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.inner.service_name = Some(service_name.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.inner.request_id = Some(request_id.into());
        self
    }

    pub fn rate_limit_info(mut self, info: RateLimitInfo) -> Self {
        self.inner.rate_limit_info = Some(info);
        self
    }

    /// Returns the request id set so far, if any.
    pub fn current_request_id(&self) -> Option<&str> {
        self.inner.request_id.as_deref()
    }

    /// Seals the error.
    pub fn build(self) -> ServiceError {
        self.inner
    }
}

/// The main error type for service calls.
///
/// # Examples
///
/// ```no_run
/// use callcore::{Error, ErrorType};
///
/// fn report(result: Result<(), Error>) {
///     match result {
///         Ok(()) => {}
///         Err(Error::Service(err)) if err.error_type() == ErrorType::Throttling => {
///             eprintln!("throttled by {:?}: {}", err.service_name(), err);
///         }
///         Err(Error::Cancelled) => eprintln!("call was cancelled"),
///         Err(e) => eprintln!("call failed: {}", e),
///     }
/// }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The service returned an error response, classified and enriched with metadata.
    #[error(transparent)]
    Service(Box<ServiceError>),

    /// The call was cancelled.
    ///
    /// Cancellation is never retried and never reclassified: every layer passes it
    /// through unchanged.
    #[error("Request was cancelled")]
    Cancelled,

    /// The transport failed before a response was received (connection refused, DNS
    /// failure, timeout, ...).
    #[error("Transport error: {source}")]
    Transport {
        /// The underlying transport failure.
        #[source]
        source: BoxError,
    },

    /// A response body could not be parsed into the expected shape.
    ///
    /// The raw body is preserved for debugging.
    #[error("Failed to unmarshall response (status {status}): {message}")]
    Unmarshalling {
        /// The HTTP status code of the response
        status: StatusCode,
        /// What went wrong while parsing
        message: String,
        /// The raw response body
        raw_response: String,
    },

    /// A modeled field was requested with the wrong type.
    #[error("Field `{field}` cannot be read as {expected}")]
    FieldType {
        /// The requested field name
        field: String,
        /// The requested type
        expected: &'static str,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Wraps an arbitrary transport failure.
    pub fn transport(source: impl Into<BoxError>) -> Self {
        Error::Transport {
            source: source.into(),
        }
    }

    /// Returns `true` if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Transport failures, service errors typed `Service` or `Throttling`, and
    /// 429/5xx responses are considered retryable. Cancellation never is.
    ///
    /// # Examples
    ///
    /// ```
    /// use callcore::{Error, ErrorType, ServiceError};
    /// use http::StatusCode;
    ///
    /// let err: Error = ServiceError::builder("Internal error")
    ///     .status(StatusCode::INTERNAL_SERVER_ERROR)
    ///     .error_type(ErrorType::Service)
    ///     .build()
    ///     .into();
    /// assert!(err.is_retryable());
    ///
    /// let err: Error = ServiceError::builder("Bad request")
    ///     .status(StatusCode::BAD_REQUEST)
    ///     .error_type(ErrorType::Client)
    ///     .build()
    ///     .into();
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Service(err) => {
                matches!(err.error_type(), ErrorType::Service | ErrorType::Throttling)
                    || err
                        .status()
                        .is_some_and(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
            }
            Error::Transport { .. } => true,
            Error::Cancelled => false,
            Error::Unmarshalling { .. } => false,
            Error::FieldType { .. } => false,
            Error::Configuration(_) => false,
            Error::SerializationFailed(_) => false,
            Error::InvalidUrl(_) => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Service(err) => err.status(),
            Error::Unmarshalling { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the error classification of a service error.
    pub fn error_type(&self) -> Option<ErrorType> {
        self.service_error().map(ServiceError::error_type)
    }

    /// Returns the service error if this is one.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Error::Service(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the raw response body of an unparseable response.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Unmarshalling { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        Error::Service(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::transport(err)
    }
}

/// A specialized `Result` type for service calls.
pub type Result<T> = std::result::Result<T, Error>;
