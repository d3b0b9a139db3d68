//! Operation-specific response handlers.
//!
//! A [`ResponseHandler`] turns a raw [`HttpResponse`] into a typed value. Each operation
//! supplies two: a success parser producing a [`Response`] envelope and an error parser
//! producing a [`ServiceError`]. Handlers are stateless and shared read-only between
//! concurrent calls.

use crate::attributes::ExecutionAttributes;
use crate::metadata::{request_id_from_headers, HttpMetadata, ResponseMetadata};
use crate::transport::HttpResponse;
use crate::{Error, ErrorType, Response, Result, ServiceError};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;

/// Error codes that mean "slow down" regardless of the status code they arrive with.
pub const THROTTLING_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "TransactionInProgressException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "LimitExceededException",
    "RequestThrottled",
    "SlowDown",
];

/// Converts a raw response into a `T`.
///
/// Closures with the same signature are handlers too.
pub trait ResponseHandler<T>: Send + Sync {
    /// Parses `response`.
    ///
    /// # Errors
    ///
    /// Returns an error when the response does not have the expected shape.
    /// [`Error::Cancelled`] must be returned as-is.
    fn handle(&self, response: &HttpResponse, attributes: &ExecutionAttributes) -> Result<T>;

    /// Whether the underlying connection must stay open after this handler ran, e.g.
    /// because the handler hands out a streaming body.
    fn needs_connection_left_open(&self) -> bool {
        false
    }
}

impl<T, F> ResponseHandler<T> for F
where
    F: Fn(&HttpResponse, &ExecutionAttributes) -> Result<T> + Send + Sync,
{
    fn handle(&self, response: &HttpResponse, attributes: &ExecutionAttributes) -> Result<T> {
        self(response, attributes)
    }
}

/// Parses a JSON success body into a [`Response<T>`], recording both metadata
/// components.
///
/// A missing body is read as JSON `null`, so `()` and `Option<_>` payloads accept
/// empty responses.
pub struct JsonResponseHandler<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonResponseHandler<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonResponseHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonResponseHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonResponseHandler")
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> ResponseHandler<Response<T>> for JsonResponseHandler<T> {
    fn handle(
        &self,
        response: &HttpResponse,
        _attributes: &ExecutionAttributes,
    ) -> Result<Response<T>> {
        let body = response.body().unwrap_or(&b"null"[..]);

        let data = serde_json::from_slice::<T>(body).map_err(|e| {
            tracing::error!(
                error = %e,
                raw_response = %response.body_text(),
                "Failed to deserialize response"
            );
            Error::Unmarshalling {
                status: response.status(),
                message: e.to_string(),
                raw_response: response.body_text().into_owned(),
            }
        })?;

        Ok(Response::builder(data)
            .http_metadata(HttpMetadata::new(
                response.status(),
                response.headers().clone(),
            ))
            .response_metadata(ResponseMetadata::from_headers(response.headers()))
            .build())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "__type", alias = "Code", alias = "errorCode")]
    code: Option<String>,
    #[serde(alias = "Message", alias = "errorMessage")]
    message: Option<String>,
}

/// Parses JSON error bodies such as `{"code": "NoSuchWidget", "message": "..."}`.
///
/// Fails on empty or unrecognizable bodies, leaving the fallback to the classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonErrorParser;

impl ResponseHandler<ServiceError> for JsonErrorParser {
    fn handle(
        &self,
        response: &HttpResponse,
        _attributes: &ExecutionAttributes,
    ) -> Result<ServiceError> {
        let unmarshalling = |message: String| Error::Unmarshalling {
            status: response.status(),
            message,
            raw_response: response.body_text().into_owned(),
        };

        let body = response
            .body()
            .ok_or_else(|| unmarshalling("empty error response body".to_string()))?;
        let parsed: ErrorBody =
            serde_json::from_slice(body).map_err(|e| unmarshalling(e.to_string()))?;

        // `__type` may be namespaced, e.g. `com.example#NoSuchWidget`.
        let code = parsed
            .code
            .map(|code| code.rsplit('#').next().unwrap_or_default().to_owned());
        if code.is_none() && parsed.message.is_none() {
            return Err(unmarshalling(
                "error body has neither a code nor a message".to_string(),
            ));
        }

        let message = parsed
            .message
            .or_else(|| code.clone())
            .unwrap_or_else(|| response.status_text().to_owned());
        let mut builder = ServiceError::builder(message)
            .error_type(error_type_for(code.as_deref(), response.status()));
        if let Some(code) = code {
            builder = builder.error_code(code);
        }
        if let Some(request_id) = request_id_from_headers(response.headers()) {
            builder = builder.request_id(request_id);
        }
        Ok(builder.build())
    }
}

/// Classifies an error from its service error code and HTTP status.
pub fn error_type_for(error_code: Option<&str>, status: StatusCode) -> ErrorType {
    if error_code.is_some_and(|code| THROTTLING_ERROR_CODES.contains(&code)) {
        return ErrorType::Throttling;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorType::Throttling
    } else if status.is_client_error() {
        ErrorType::Client
    } else if status.is_server_error() {
        ErrorType::Service
    } else {
        ErrorType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Widget {
        id: u32,
    }

    fn attributes() -> ExecutionAttributes {
        ExecutionAttributes::new()
    }

    #[test]
    fn test_json_success_records_metadata() {
        let response = HttpResponse::new(StatusCode::OK)
            .with_header("x-amzn-requestid", HeaderValue::from_static("req-1"))
            .with_body(r#"{"id": 3}"#);

        let parsed = JsonResponseHandler::<Widget>::new()
            .handle(&response, &attributes())
            .unwrap();

        assert_eq!(parsed.data(), &Widget { id: 3 });
        assert_eq!(parsed.http_metadata().unwrap().status, StatusCode::OK);
        assert_eq!(parsed.request_id(), Some("req-1"));
    }

    #[test]
    fn test_json_success_empty_body_as_unit() {
        let response = HttpResponse::new(StatusCode::NO_CONTENT);
        let parsed = JsonResponseHandler::<()>::new().handle(&response, &attributes());
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_json_success_parse_failure() {
        let response = HttpResponse::new(StatusCode::OK).with_body("invalid json");

        match JsonResponseHandler::<Widget>::new().handle(&response, &attributes()) {
            Err(Error::Unmarshalling {
                status,
                raw_response,
                ..
            }) => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(raw_response, "invalid json");
            }
            other => panic!("Expected Unmarshalling, got {:?}", other),
        }
    }

    #[test]
    fn test_error_parser_reads_code_and_message() {
        let response = HttpResponse::new(StatusCode::NOT_FOUND)
            .with_body(r#"{"__type": "com.example#NoSuchWidget", "Message": "gone"}"#);

        let err = JsonErrorParser.handle(&response, &attributes()).unwrap();
        assert_eq!(err.error_code(), Some("NoSuchWidget"));
        assert_eq!(err.message(), "gone");
        assert_eq!(err.error_type(), ErrorType::Client);
    }

    #[test]
    fn test_error_parser_throttling_code_wins() {
        let response = HttpResponse::new(StatusCode::BAD_REQUEST)
            .with_body(r#"{"code": "ThrottlingException"}"#);

        let err = JsonErrorParser.handle(&response, &attributes()).unwrap();
        assert_eq!(err.error_type(), ErrorType::Throttling);
        assert_eq!(err.message(), "ThrottlingException");
    }

    #[test]
    fn test_error_parser_rejects_empty_and_unknown_bodies() {
        let empty = HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE);
        assert!(matches!(
            JsonErrorParser.handle(&empty, &attributes()),
            Err(Error::Unmarshalling { .. })
        ));

        let shapeless = HttpResponse::new(StatusCode::BAD_REQUEST).with_body("{}");
        assert!(matches!(
            JsonErrorParser.handle(&shapeless, &attributes()),
            Err(Error::Unmarshalling { .. })
        ));
    }

    #[test]
    fn test_error_type_for_status() {
        assert_eq!(
            error_type_for(None, StatusCode::TOO_MANY_REQUESTS),
            ErrorType::Throttling
        );
        assert_eq!(error_type_for(None, StatusCode::FORBIDDEN), ErrorType::Client);
        assert_eq!(
            error_type_for(None, StatusCode::BAD_GATEWAY),
            ErrorType::Service
        );
        assert_eq!(
            error_type_for(None, StatusCode::MOVED_PERMANENTLY),
            ErrorType::Unknown
        );
    }
}
