//! The execution pipeline.
//!
//! [`Client`] runs one logical call as a loop of attempts: send through the
//! [`Transport`], hand 2xx responses to the operation's success handler and everything
//! else to its [`ErrorClassifier`], then let the [`RetryPolicy`] decide whether to wait
//! and try again. Use [`ClientBuilder`] to configure and create clients.

use crate::attributes::{ExecutionAttributes, OPERATION_NAME, RETRIES_ATTEMPTED, SERVICE_NAME};
use crate::classify::ErrorClassifier;
use crate::handler::{JsonErrorParser, JsonResponseHandler, ResponseHandler};
use crate::retry::{RetryPolicy, RetryPolicyContext};
use crate::transport::{HttpResponse, Transport};
use crate::{CancellationToken, Error, Result, ServiceError};
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Everything the pipeline needs to know about one service operation.
///
/// Operations hold only stateless handlers and can be shared between concurrent calls.
#[derive(Debug, Clone)]
pub struct Operation<S, E> {
    name: String,
    success_handler: S,
    error_classifier: ErrorClassifier<E>,
}

impl<S, E> Operation<S, E>
where
    E: ResponseHandler<ServiceError>,
{
    /// Creates an operation. `error_parser` is wrapped in an [`ErrorClassifier`].
    pub fn new(name: impl Into<String>, success_handler: S, error_parser: E) -> Self {
        Self {
            name: name.into(),
            success_handler,
            error_classifier: ErrorClassifier::new(error_parser),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn success_handler(&self) -> &S {
        &self.success_handler
    }

    pub fn error_classifier(&self) -> &ErrorClassifier<E> {
        &self.error_classifier
    }
}

impl<T> Operation<JsonResponseHandler<T>, JsonErrorParser> {
    /// An operation with JSON success and error bodies.
    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, JsonResponseHandler::new(), JsonErrorParser)
    }
}

/// Executes operations against one service.
///
/// The client is cheap to clone and can be shared across tasks. Retry counters and
/// execution attributes live in each call, never in the client.
///
/// # Examples
///
/// ```no_run
/// use callcore::transport::{HttpRequest, ReqwestTransport};
/// use callcore::{Client, Operation, Response, RetryPolicy};
/// use http::Method;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Widget {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), callcore::Error> {
/// let client = Client::builder()
///     .service_name("Widgets")
///     .transport(
///         ReqwestTransport::builder()
///             .base_url("https://widgets.example.com")?
///             .build()?,
///     )
///     .retry_policy(RetryPolicy::builder().max_retries(2).build()?)
///     .build()?;
///
/// let get_widget = Operation::json("GetWidget");
/// let request = HttpRequest::new(Method::GET, "/widgets/7");
///
/// let widget: Response<Widget> = client.execute(&get_widget, &request).await?;
/// println!("{} (request {:?})", widget.name, widget.request_id());
/// # Ok(())
/// # }
/// ```
pub struct Client<T> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T> {
    service_name: String,
    transport: T,
    retry_policy: RetryPolicy,
}

/// The outcome of a failed attempt.
struct Failure {
    error: Error,
    status: Option<StatusCode>,
}

impl<T: Transport> Client<T> {
    pub fn builder() -> ClientBuilder<T> {
        ClientBuilder::new()
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    /// Executes `operation` with retries.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt once the retry policy gives up.
    pub async fn execute<Res, S, E>(
        &self,
        operation: &Operation<S, E>,
        request: &T::Request,
    ) -> Result<Res>
    where
        S: ResponseHandler<Res>,
        E: ResponseHandler<ServiceError>,
    {
        self.run(operation, request, None).await
    }

    /// Executes `operation` with retries until it completes or `cancellation` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] as soon as the token is cancelled, without a further
    /// attempt. Otherwise behaves like [`execute`](Self::execute).
    pub async fn execute_with_cancellation<Res, S, E>(
        &self,
        operation: &Operation<S, E>,
        request: &T::Request,
        cancellation: &CancellationToken,
    ) -> Result<Res>
    where
        S: ResponseHandler<Res>,
        E: ResponseHandler<ServiceError>,
    {
        self.run(operation, request, Some(cancellation)).await
    }

    async fn run<Res, S, E>(
        &self,
        operation: &Operation<S, E>,
        request: &T::Request,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Res>
    where
        S: ResponseHandler<Res>,
        E: ResponseHandler<ServiceError>,
    {
        let policy = &self.inner.retry_policy;
        let mut attributes = ExecutionAttributes::new();
        attributes
            .put_attribute(&SERVICE_NAME, self.inner.service_name.clone())
            .put_attribute(&OPERATION_NAME, operation.name().to_owned());

        let mut retries_attempted: u32 = 0;
        loop {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::Cancelled);
            }
            attributes.put_attribute(&RETRIES_ATTEMPTED, retries_attempted);

            tracing::debug!(
                service = %self.inner.service_name,
                operation = %operation.name(),
                attempt = retries_attempted + 1,
                "Executing request"
            );

            let Failure { error, status } = match self
                .attempt(operation, request, &attributes, cancellation)
                .await
            {
                Ok(result) => return Ok(result),
                Err(failure) => failure,
            };

            if error.is_cancelled() {
                tracing::debug!(operation = %operation.name(), "Request cancelled");
                return Err(error);
            }

            tracing::warn!(
                error = %error,
                operation = %operation.name(),
                retries_attempted = retries_attempted,
                "Request attempt failed"
            );

            let delay = {
                let context = RetryPolicyContext::new(request, &error, retries_attempted, status);
                if policy.should_retry(&context) {
                    Some(policy.compute_delay(&context))
                } else {
                    None
                }
            };
            let Some(delay) = delay else {
                return Err(error);
            };

            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                retries_attempted = retries_attempted,
                operation = %operation.name(),
                "Retrying request after delay"
            );

            wait(delay, cancellation).await?;
            retries_attempted += 1;
        }
    }

    async fn attempt<Res, S, E>(
        &self,
        operation: &Operation<S, E>,
        request: &T::Request,
        attributes: &ExecutionAttributes,
        cancellation: Option<&CancellationToken>,
    ) -> std::result::Result<Res, Failure>
    where
        S: ResponseHandler<Res>,
        E: ResponseHandler<ServiceError>,
    {
        let send = self.inner.transport.send(request);
        let sent = match cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                result = send => result,
            },
            None => send.await,
        };
        let response = sent.map_err(|error| Failure {
            error,
            status: None,
        })?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "Received HTTP response");

        if status.is_success() {
            let handler = operation.success_handler();
            let result = handler.handle(&response, attributes);
            self.release(response, handler.needs_connection_left_open());
            return result.map_err(|error| Failure {
                error,
                status: Some(status),
            });
        }

        let classifier = operation.error_classifier();
        let error = match classifier.classify(&response, attributes) {
            Ok(service_error) => Error::from(service_error),
            Err(error) => error,
        };
        self.release(response, classifier.needs_connection_left_open());
        Err(Failure {
            error,
            status: Some(status),
        })
    }

    fn release(&self, response: HttpResponse, keep_open: bool) {
        if keep_open {
            tracing::debug!("Handler keeps the connection open, skipping release");
        } else {
            self.inner.transport.release(response);
        }
    }
}

async fn wait(delay: Duration, cancellation: Option<&CancellationToken>) -> Result<()> {
    match cancellation {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("service_name", &self.inner.service_name)
            .field("retry_policy", &self.inner.retry_policy)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use callcore::transport::ReqwestTransport;
/// use callcore::{ClientBuilder, RetryPolicy};
///
/// # fn example() -> Result<(), callcore::Error> {
/// let transport = ReqwestTransport::builder()
///     .base_url("https://widgets.example.com")?
///     .build()?;
///
/// let client = ClientBuilder::new()
///     .service_name("Widgets")
///     .transport(transport)
///     .retry_policy(RetryPolicy::none())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder<T> {
    service_name: Option<String>,
    transport: Option<T>,
    retry_policy: Option<RetryPolicy>,
}

impl<T: Transport> ClientBuilder<T> {
    pub fn new() -> Self {
        Self {
            service_name: None,
            transport: None,
            retry_policy: None,
        }
    }

    /// Sets the service name stamped onto every error this client reports.
    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the retry policy. Defaults to [`RetryPolicy::default`].
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the service name or the transport is missing.
    pub fn build(self) -> Result<Client<T>> {
        let service_name = self
            .service_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Configuration("Service name is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::Configuration("Transport is required".to_string()))?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                service_name,
                transport,
                retry_policy: self.retry_policy.unwrap_or_default(),
            }),
        })
    }
}

impl<T: Transport> Default for ClientBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
