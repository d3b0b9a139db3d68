//! Metadata shared by every response envelope.

use http::{HeaderMap, StatusCode};
use std::collections::BTreeMap;

/// Headers that services use to report their request identifier, in lookup order.
pub const REQUEST_ID_HEADERS: &[&str] = &["x-amzn-requestid", "x-amz-request-id", "x-request-id"];

/// A snapshot of the HTTP layer of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpMetadata {
    /// The HTTP status code.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,
}

impl HttpMetadata {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// Service-assigned metadata about a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    request_id: Option<String>,
    values: BTreeMap<String, String>,
}

impl ResponseMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds metadata from response headers, picking up the request id.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            request_id: request_id_from_headers(headers),
            values: BTreeMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Adds a service-specific metadata entry.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// The service-assigned request identifier.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Returns the first request id header present in `headers`.
pub fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    REQUEST_ID_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|value| value.to_str().ok())
        .map(str::to_owned)
}
