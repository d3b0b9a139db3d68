//! Classification of error responses.
//!
//! [`ErrorClassifier`] wraps an operation's error parser. It lets the parser do the
//! real work, falls back to status-based synthesis when the parser cannot make sense of
//! the body, and stamps every resulting [`ServiceError`] with the observed status, the
//! calling service's name and any request id and rate limit hints in the headers.

use crate::attributes::{ExecutionAttributes, SERVICE_NAME};
use crate::handler::ResponseHandler;
use crate::metadata::request_id_from_headers;
use crate::rate_limit::RateLimitInfo;
use crate::transport::HttpResponse;
use crate::{Error, ErrorType, Result, ServiceError};
use http::StatusCode;

/// Message and error code of errors synthesized for 413 responses.
pub const REQUEST_ENTITY_TOO_LARGE: &str = "Request entity too large";

/// Turns error responses into fully populated [`ServiceError`]s.
///
/// # Examples
///
/// ```
/// use callcore::attributes::{ExecutionAttributes, SERVICE_NAME};
/// use callcore::classify::ErrorClassifier;
/// use callcore::handler::JsonErrorParser;
/// use callcore::transport::HttpResponse;
/// use callcore::ErrorType;
/// use http::StatusCode;
///
/// let classifier = ErrorClassifier::new(JsonErrorParser);
/// let mut attributes = ExecutionAttributes::new();
/// attributes.put_attribute(&SERVICE_NAME, "Widgets".to_string());
///
/// // The body is empty, so the parser fails and the 5xx fallback applies.
/// let response = HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE);
/// let err = classifier.classify(&response, &attributes).unwrap();
///
/// assert_eq!(err.error_code(), Some("Service Unavailable"));
/// assert_eq!(err.error_type(), ErrorType::Service);
/// assert_eq!(err.service_name(), Some("Widgets"));
/// ```
#[derive(Debug, Clone)]
pub struct ErrorClassifier<H> {
    delegate: H,
}

impl<H> ErrorClassifier<H>
where
    H: ResponseHandler<ServiceError>,
{
    pub fn new(delegate: H) -> Self {
        Self { delegate }
    }

    pub fn delegate(&self) -> &H {
        &self.delegate
    }

    /// Classifies `response`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] unchanged if the delegate was cancelled, and the
    /// delegate's own failure when the status code has no fallback.
    pub fn classify(
        &self,
        response: &HttpResponse,
        attributes: &ExecutionAttributes,
    ) -> Result<ServiceError> {
        let error = match self.delegate.handle(response, attributes) {
            Ok(error) => error,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(parse_failure) => synthesize(response, parse_failure)?,
        };

        let status = response.status();
        let mut builder = error.into_builder().status(status);
        match attributes.attribute(&SERVICE_NAME) {
            Some(service_name) => builder = builder.service_name(service_name.as_str()),
            None => tracing::debug!("No service name in execution attributes"),
        }
        if builder.current_request_id().is_none() {
            if let Some(request_id) = request_id_from_headers(response.headers()) {
                builder = builder.request_id(request_id);
            }
        }
        let rate_limit_info = RateLimitInfo::from_headers(response.headers());
        if !rate_limit_info.is_empty() {
            builder = builder.rate_limit_info(rate_limit_info);
        }
        let error = builder.build();

        if status.is_client_error() {
            tracing::error!(
                status = status.as_u16(),
                error_code = error.error_code().unwrap_or_default(),
                error_type = %error.error_type(),
                "Client error (4xx)"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                error_code = error.error_code().unwrap_or_default(),
                error_type = %error.error_type(),
                "Service error"
            );
        }

        Ok(error)
    }
}

/// Builds an error for bodiless or unparseable responses whose status alone is
/// meaningful; otherwise hands back the parser's failure.
fn synthesize(response: &HttpResponse, parse_failure: Error) -> Result<ServiceError> {
    let status = response.status();

    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return Ok(ServiceError::builder(REQUEST_ENTITY_TOO_LARGE)
            .error_code(REQUEST_ENTITY_TOO_LARGE)
            .error_type(ErrorType::Client)
            .status(status)
            .build());
    }

    if status.is_server_error() {
        tracing::debug!(
            status = status.as_u16(),
            error = %parse_failure,
            "Error parser failed, classifying by status"
        );
        return Ok(ServiceError::builder(response.status_text())
            .error_code(response.status_text())
            .error_type(ErrorType::Service)
            .status(status)
            .build());
    }

    Err(parse_failure)
}

impl<H> ResponseHandler<ServiceError> for ErrorClassifier<H>
where
    H: ResponseHandler<ServiceError>,
{
    fn handle(
        &self,
        response: &HttpResponse,
        attributes: &ExecutionAttributes,
    ) -> Result<ServiceError> {
        self.classify(response, attributes)
    }

    fn needs_connection_left_open(&self) -> bool {
        self.delegate.needs_connection_left_open()
    }
}
