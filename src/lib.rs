//! # Callcore - request execution for generated service clients
//!
//! Callcore is the shared runtime behind generated HTTP service clients. Each generated
//! operation supplies a success parser and an error parser; callcore runs the call:
//! it sends through a pluggable [`Transport`](transport::Transport), classifies error
//! responses into [`ServiceError`]s, retries according to a [`RetryPolicy`], and hands
//! back a typed [`Response`] envelope.
//!
//! ## Quick Start
//!
//! ```no_run
//! use callcore::transport::{HttpRequest, ReqwestTransport};
//! use callcore::{Client, Operation, Response};
//! use http::Method;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Widget {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callcore::Error> {
//!     let client = Client::builder()
//!         .service_name("Widgets")
//!         .transport(
//!             ReqwestTransport::builder()
//!                 .base_url("https://widgets.example.com")?
//!                 .build()?,
//!         )
//!         .build()?;
//!
//!     let get_widget = Operation::json("GetWidget");
//!     let request = HttpRequest::new(Method::GET, "/widgets/7");
//!
//!     let widget: Response<Widget> = client.execute(&get_widget, &request).await?;
//!     println!("Widget {}: {}", widget.id, widget.name);
//!     println!("Request id: {:?}", widget.request_id());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Error classification** - Error responses become [`ServiceError`]s stamped with status,
//!   service name and request id, with fallbacks for unparseable 413 and 5xx responses
//! - **Composable retry policies** - Conditions, backoff strategies and a mandatory
//!   max-retries gate, see [`retry`] and [`backoff`]
//! - **Rate limit awareness** - `Retry-After` and `X-RateLimit-*` hints drive the retry delay
//! - **Cancellation** - A [`CancellationToken`] aborts in-flight sends and backoff waits
//! - **Typed envelopes** - [`Response<T>`] carries the payload plus HTTP and service metadata
//! - **Structured logging** - Every attempt, retry and classification is traced with `tracing`
//!
//! ## Error Handling
//!
//! ```no_run
//! use callcore::{Error, ErrorType};
//!
//! # fn example(result: Result<(), Error>) {
//! match result {
//!     Ok(()) => {}
//!     Err(Error::Service(err)) => {
//!         eprintln!("{} failed with {:?}: {}", err.service_name().unwrap_or("?"), err.error_code(), err);
//!         if err.error_type() == ErrorType::Throttling {
//!             eprintln!("slow down");
//!         }
//!     }
//!     Err(Error::Unmarshalling { status, raw_response, .. }) => {
//!         eprintln!("Unreadable response (status {}): {}", status, raw_response);
//!     }
//!     Err(Error::Cancelled) => eprintln!("Cancelled"),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```
//!
//! ## Retry Policies
//!
//! ```
//! use callcore::backoff::Backoff;
//! use callcore::retry::{OrCondition, RetryOnStatusCodes, RetryOnTransportError};
//! use callcore::RetryPolicy;
//! use http::StatusCode;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), callcore::Error> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .condition(OrCondition::new(vec![
//!         Box::new(RetryOnStatusCodes(vec![StatusCode::SERVICE_UNAVAILABLE])),
//!         Box::new(RetryOnTransportError),
//!     ]))
//!     .backoff(Backoff::Exponential {
//!         base_delay: Duration::from_millis(100),
//!         max_delay: Duration::from_secs(30),
//!         jitter: true,
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod backoff;
mod cancel;
pub mod classify;
mod client;
mod error;
pub mod handler;
pub mod metadata;
pub mod rate_limit;
mod response;
pub mod retry;
pub mod transport;

pub use cancel::CancellationToken;
pub use client::{Client, ClientBuilder, Operation};
pub use error::{BoxError, Error, ErrorType, Result, ServiceError, ServiceErrorBuilder};
pub use response::{ModeledFields, Response, ResponseBuilder};
pub use retry::RetryPolicy;
