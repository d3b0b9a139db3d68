//! The transport seam and a `reqwest`-backed implementation.
//!
//! The pipeline only needs two things from a transport: send a prepared request and
//! hand back the raw [`HttpResponse`], or fail. Connection pooling, TLS and framing stay
//! behind the [`Transport`] trait.

use crate::{Error, Result};
use async_trait::async_trait;
use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// A raw response as received from the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl HttpResponse {
    /// Creates a response with the canonical status text and no body.
    ///
    /// Codes without a canonical reason use the numeric code as their text.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            status_text: status
                .canonical_reason()
                .unwrap_or_else(|| status.as_str())
                .to_owned(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the body. An empty body is recorded as absent.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.body = (!body.is_empty()).then_some(body);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase reported alongside the status code.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Returns `true` if the response carried a body.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// The body decoded as UTF-8, lossily. Empty when there is no body.
    pub fn body_text(&self) -> Cow<'_, str> {
        match &self.body {
            Some(body) => String::from_utf8_lossy(body),
            None => Cow::Borrowed(""),
        }
    }
}

/// Sends prepared requests.
///
/// Implementations report cancellation as [`Error::Cancelled`] and every other failure
/// as [`Error::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// The prepared request this transport understands.
    type Request: Send + Sync + 'static;

    /// Performs one round trip.
    async fn send(&self, request: &Self::Request) -> Result<HttpResponse>;

    /// Returns the resources behind `response` to the transport.
    ///
    /// The pipeline calls this once a handler is done with a response, unless the
    /// handler asked for the connection to be left open.
    fn release(&self, response: HttpResponse) {
        drop(response);
    }
}

/// A prepared HTTP request for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: Method,

    /// The request path, relative to the transport's base URL.
    pub path: String,

    /// Headers for this request, on top of the transport defaults.
    pub headers: HeaderMap,

    /// Query parameters.
    pub query_params: HashMap<String, String>,

    /// The JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: HashMap::new(),
            body: None,
        }
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Serializes `body` as the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if `body` cannot be serialized.
    pub fn with_json_body<B: Serialize>(mut self, body: &B) -> Result<Self> {
        let json =
            serde_json::to_value(body).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        self.body = Some(json);
        Ok(self)
    }
}

/// A [`Transport`] over a pooled `reqwest` client.
///
/// # Examples
///
/// ```no_run
/// use callcore::transport::ReqwestTransport;
/// use std::time::Duration;
///
/// # fn example() -> callcore::Result<()> {
/// let transport = ReqwestTransport::builder()
///     .base_url("https://widgets.example.com")?
///     .default_header("User-Agent", "widgets-client/1.0")?
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
    base_url: Url,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }

    fn url_for(&self, request: &HttpRequest) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&request.path);
        for (key, value) in &request.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    type Request = HttpRequest;

    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.url_for(request);

        tracing::debug!(method = %request.method, url = %url, "Sending HTTP request");

        let mut builder = self.http_client.request(request.method.clone(), url);
        for (name, value) in &self.default_headers {
            builder = builder.header(name, value);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let reason = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
            .filter(|reason| !reason.is_empty())
            .map(str::to_owned);
        let body = response.bytes().await?;

        let mut http_response = HttpResponse::new(status).with_headers(headers);
        if let Some(reason) = reason {
            http_response = http_response.with_status_text(reason);
        }
        Ok(http_response.with_body(body.to_vec()))
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug, Default)]
pub struct ReqwestTransportBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

impl ReqwestTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// # Errors
    ///
    /// Returns an error if no base URL was provided or the HTTP client cannot be built.
    pub fn build(self) -> Result<ReqwestTransport> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Configuration("Base URL is required".to_string()))?;

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestTransport {
            http_client,
            base_url,
            default_headers: self.default_headers,
            timeout: self.timeout,
        })
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
    Ok((name, value))
}
