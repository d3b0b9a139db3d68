//! Example demonstrating retries, error classification and cancellation.
//!
//! This example starts a local mock service that fails twice before succeeding, then:
//! - Executes a JSON operation with a custom retry policy
//! - Shows how a modeled error response is classified
//! - Cancels a call that is stuck waiting to retry
//!
//! Run with: `cargo run --example retry_and_cancel`

use callcore::backoff::Backoff;
use callcore::transport::{HttpRequest, ReqwestTransport};
use callcore::{CancellationToken, Client, Error, Operation, Response, RetryPolicy};
use http::Method;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize)]
struct Widget {
    id: u32,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("callcore=debug,retry_and_cancel=info")
        .init();

    let server = MockServer::start().await;
    let calls = AtomicUsize::new(0);
    Mock::given(method("GET"))
        .and(path("/widgets/1"))
        .respond_with(move |_req: &wiremock::Request| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200).set_body_json(Widget {
                    id: 1,
                    name: "Sprocket".to_string(),
                })
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/widgets/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "code": "NoSuchWidget",
            "message": "Widget 404 does not exist"
        })))
        .mount(&server)
        .await;

    let client = Client::builder()
        .service_name("Widgets")
        .transport(ReqwestTransport::builder().base_url(server.uri())?.build()?)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(3)
                .backoff(Backoff::Exponential {
                    base_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(2),
                    jitter: true,
                })
                .build()?,
        )
        .build()?;
    let get_widget = Operation::json("GetWidget");

    println!("=== Retrying through two 503s ===");
    let widget: Response<Widget> = client
        .execute(&get_widget, &HttpRequest::new(Method::GET, "/widgets/1"))
        .await?;
    println!("Got {:?}", widget.data());

    println!("\n=== Classified client error ===");
    let missing: Result<Response<Widget>, Error> = client
        .execute(&get_widget, &HttpRequest::new(Method::GET, "/widgets/404"))
        .await;
    if let Err(Error::Service(err)) = missing {
        println!("{}", err);
        println!("  type: {}, retryable: no", err.error_type());
    }

    println!("\n=== Cancelling a call in backoff ===");
    let slow_client = Client::builder()
        .service_name("Widgets")
        .transport(ReqwestTransport::builder().base_url(server.uri())?.build()?)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(3)
                .backoff(Backoff::Fixed(Duration::from_secs(30)))
                .build()?,
        )
        .build()?;
    Mock::given(method("GET"))
        .and(path("/widgets/slow"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let result: Result<Response<Widget>, Error> = slow_client
        .execute_with_cancellation(
            &get_widget,
            &HttpRequest::new(Method::GET, "/widgets/slow"),
            &token,
        )
        .await;
    println!("Cancelled: {}", matches!(result, Err(Error::Cancelled)));

    Ok(())
}
