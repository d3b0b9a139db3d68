//! Pipeline properties checked against a scripted in-memory transport.

use async_trait::async_trait;
use callcore::attributes::{ExecutionAttributes, OPERATION_NAME, RETRIES_ATTEMPTED, SERVICE_NAME};
use callcore::backoff::Backoff;
use callcore::handler::{JsonErrorParser, ResponseHandler};
use callcore::retry::RetryPolicyContext;
use callcore::transport::{HttpResponse, Transport};
use callcore::{
    CancellationToken, Client, Error, ErrorType, Operation, Result, RetryPolicy, ServiceError,
};
use http::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays canned outcomes, one per send.
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse>>>,
    sent: AtomicUsize,
    released: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<HttpResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            sent: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    fn statuses(statuses: &[u16]) -> Self {
        Self::new(
            statuses
                .iter()
                .map(|&status| {
                    let status = StatusCode::from_u16(status).unwrap();
                    let response = HttpResponse::new(status);
                    Ok(if status.is_success() {
                        response.with_body("ok")
                    } else {
                        response
                    })
                })
                .collect(),
        )
    }

    fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Request = String;

    async fn send(&self, _request: &String) -> Result<HttpResponse> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::transport("script exhausted")))
    }

    fn release(&self, _response: HttpResponse) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn body_text(response: &HttpResponse, _attributes: &ExecutionAttributes) -> Result<String> {
    Ok(response.body_text().into_owned())
}

fn client(transport: ScriptedTransport, max_retries: i32) -> Client<ScriptedTransport> {
    Client::builder()
        .service_name("Widgets")
        .transport(transport)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(max_retries)
                .backoff(Backoff::None)
                .throttling_backoff(Backoff::None)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_two_failures_then_success_within_budget() {
    let client = client(ScriptedTransport::statuses(&[500, 500, 200]), 2);
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let result = client.execute(&operation, &"req".to_string()).await.unwrap();

    assert_eq!(result, "ok");
    assert_eq!(client.transport().sent(), 3);
}

#[tokio::test]
async fn test_two_failures_exhaust_smaller_budget() {
    let client = client(ScriptedTransport::statuses(&[500, 500, 200]), 1);
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let result = client.execute(&operation, &"req".to_string()).await;

    match result {
        Err(Error::Service(err)) => {
            assert_eq!(err.error_type(), ErrorType::Service);
            assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        }
        other => panic!("Expected a service error, got {:?}", other),
    }
    assert_eq!(client.transport().sent(), 2);
}

#[tokio::test]
async fn test_zero_retries_makes_one_attempt() {
    let client = client(ScriptedTransport::statuses(&[503, 200]), 0);
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let result = client.execute(&operation, &"req".to_string()).await;

    assert!(matches!(result, Err(Error::Service(_))));
    assert_eq!(client.transport().sent(), 1);
}

#[tokio::test]
async fn test_cancelling_error_parser_is_never_retried() {
    let parsed = AtomicUsize::new(0);
    let cancelling = |_: &HttpResponse, _: &ExecutionAttributes| -> Result<ServiceError> {
        parsed.fetch_add(1, Ordering::SeqCst);
        Err(Error::Cancelled)
    };
    let client = client(ScriptedTransport::statuses(&[503, 503, 200]), 5);
    let operation = Operation::new("GetWidget", body_text, cancelling);

    let result = client.execute(&operation, &"req".to_string()).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(parsed.load(Ordering::SeqCst), 1);
    assert_eq!(client.transport().sent(), 1);
}

#[tokio::test]
async fn test_cancelled_transport_is_never_retried() {
    let transport = ScriptedTransport::new(vec![
        Err(Error::Cancelled),
        Ok(HttpResponse::new(StatusCode::OK).with_body("ok")),
    ]);
    let client = client(transport, 5);
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let result = client.execute(&operation, &"req".to_string()).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(client.transport().sent(), 1);
}

#[tokio::test]
async fn test_success_parse_failure_goes_through_retry() {
    let calls = AtomicUsize::new(0);
    let flaky = |response: &HttpResponse, _: &ExecutionAttributes| -> Result<String> {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(Error::Unmarshalling {
                status: response.status(),
                message: "truncated".to_string(),
                raw_response: String::new(),
            })
        } else {
            Ok("parsed".to_string())
        }
    };
    let transport = ScriptedTransport::statuses(&[200, 200]);
    let client = Client::builder()
        .service_name("Widgets")
        .transport(transport)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(1)
                .condition(|context: &RetryPolicyContext<'_>| {
                    matches!(context.error(), Error::Unmarshalling { .. })
                        && context.status() == Some(StatusCode::OK)
                })
                .backoff(Backoff::None)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let operation = Operation::new("GetWidget", flaky, JsonErrorParser);

    let result = client.execute(&operation, &"req".to_string()).await.unwrap();

    assert_eq!(result, "parsed");
    assert_eq!(client.transport().sent(), 2);
}

#[tokio::test]
async fn test_false_condition_stops_after_first_failure() {
    let transport = ScriptedTransport::statuses(&[500, 200]);
    let client = Client::builder()
        .service_name("Widgets")
        .transport(transport)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(10)
                .condition(|_: &RetryPolicyContext<'_>| false)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let result = client.execute(&operation, &"req".to_string()).await;

    assert!(matches!(result, Err(Error::Service(_))));
    assert_eq!(client.transport().sent(), 1);
}

#[tokio::test]
async fn test_retry_context_carries_request_and_count() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let transport = ScriptedTransport::statuses(&[500, 502, 200]);
    let client = Client::builder()
        .service_name("Widgets")
        .transport(transport)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(5)
                .condition(move |context: &RetryPolicyContext<'_>| {
                    recorder.lock().unwrap().push((
                        context.request::<String>().cloned(),
                        context.retries_attempted(),
                        context.status().map(|s| s.as_u16()),
                    ));
                    true
                })
                .backoff(|context: &RetryPolicyContext<'_>| {
                    Duration::from_millis(u64::from(context.retries_attempted()))
                })
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let result = client.execute(&operation, &"req-7".to_string()).await.unwrap();

    assert_eq!(result, "ok");
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[
            (Some("req-7".to_string()), 0, Some(500)),
            (Some("req-7".to_string()), 1, Some(502)),
        ]
    );
}

#[tokio::test]
async fn test_retry_count_starts_fresh_for_each_call() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let transport = ScriptedTransport::statuses(&[500, 200, 500, 200]);
    let client = Client::builder()
        .service_name("Widgets")
        .transport(transport)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(1)
                .condition(move |context: &RetryPolicyContext<'_>| {
                    recorder.lock().unwrap().push(context.retries_attempted());
                    true
                })
                .backoff(Backoff::None)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let first = client.execute(&operation, &"req".to_string()).await.unwrap();
    let second = client.execute(&operation, &"req".to_string()).await.unwrap();

    assert_eq!(first, "ok");
    assert_eq!(second, "ok");
    assert_eq!(seen.lock().unwrap().as_slice(), &[0, 0]);
    assert_eq!(client.transport().sent(), 4);
}

#[tokio::test]
async fn test_attributes_are_populated_per_attempt() {
    let observed = Mutex::new(Vec::new());
    let recording = |response: &HttpResponse, attributes: &ExecutionAttributes| -> Result<String> {
        let mut observed = observed.lock().unwrap();
        observed.push((
            attributes.attribute(&SERVICE_NAME).cloned(),
            attributes.attribute(&OPERATION_NAME).cloned(),
            attributes.attribute(&RETRIES_ATTEMPTED).copied(),
        ));
        if observed.len() == 1 {
            Err(Error::Unmarshalling {
                status: response.status(),
                message: "truncated".to_string(),
                raw_response: String::new(),
            })
        } else {
            Ok("ok".to_string())
        }
    };
    let transport = ScriptedTransport::statuses(&[200, 200]);
    let client = Client::builder()
        .service_name("Widgets")
        .transport(transport)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(1)
                .condition(|_: &RetryPolicyContext<'_>| true)
                .backoff(Backoff::None)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let operation = Operation::new("ListWidgets", recording, JsonErrorParser);

    client.execute(&operation, &"req".to_string()).await.unwrap();

    let expected = |retries: u32| {
        (
            Some("Widgets".to_string()),
            Some("ListWidgets".to_string()),
            Some(retries),
        )
    };
    assert_eq!(
        observed.lock().unwrap().as_slice(),
        &[expected(0), expected(1)]
    );
}

#[tokio::test]
async fn test_release_skipped_when_connection_left_open() {
    struct Streaming;

    impl ResponseHandler<String> for Streaming {
        fn handle(&self, response: &HttpResponse, _: &ExecutionAttributes) -> Result<String> {
            Ok(response.body_text().into_owned())
        }

        fn needs_connection_left_open(&self) -> bool {
            true
        }
    }

    let client = client(ScriptedTransport::statuses(&[500, 200]), 1);

    let streaming = Operation::new("StreamWidget", Streaming, JsonErrorParser);
    let result = client.execute(&streaming, &"req".to_string()).await.unwrap();

    assert_eq!(result, "ok");
    assert_eq!(client.transport().sent(), 2);
    // Only the classified 500 was released; the streamed body keeps its connection.
    assert_eq!(client.transport().released(), 1);
}

#[tokio::test]
async fn test_cancellation_during_backoff_wait() {
    let transport = ScriptedTransport::statuses(&[503, 200]);
    let client = Client::builder()
        .service_name("Widgets")
        .transport(transport)
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(3)
                .backoff(Backoff::Fixed(Duration::from_secs(60)))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.execute_with_cancellation(&operation, &"req".to_string(), &token),
    )
    .await
    .expect("cancellation should end the call promptly");

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(client.transport().sent(), 1);
}

#[tokio::test]
async fn test_concurrent_calls_share_a_client() {
    let client = client(ScriptedTransport::statuses(&[200, 200, 200, 200]), 0);
    let operation = Operation::new("GetWidget", body_text, JsonErrorParser);
    let request = "req".to_string();

    let (a, b, c, d) = tokio::join!(
        client.execute(&operation, &request),
        client.execute(&operation, &request),
        client.execute(&operation, &request),
        client.execute(&operation, &request),
    );

    for result in [a, b, c, d] {
        assert_eq!(result.unwrap(), "ok");
    }
    assert_eq!(client.transport().sent(), 4);
}
