//! HTTP client for the payment dependency.
//!
//! One call to [`PaymentClient::charge`] is one attempt; the retry executor
//! decides whether another follows based on the [`ChargeError`]
//! classification. Trace context is injected into every request so the
//! payment service's spans join the caller's trace.

use std::time::Duration;

use opentelemetry::global;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use orderflow_common::resilience::RetryClass;
use orderflow_domain::{ChargeRequest, OrderError};

/// Backstop timeout on a single HTTP round-trip. The request-level deadline
/// is usually tighter and wins.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// One failed charge attempt, classified for the retry executor.
#[derive(Debug, Error)]
pub enum ChargeError {
    /// 5xx or 429: the dependency may recover, another attempt is allowed.
    #[error("payment service returned {0}")]
    RetryableStatus(u16),

    /// Terminal HTTP rejection: any other non-2xx answer.
    #[error("payment service rejected the charge ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Connect, read, write, or DNS failure.
    #[error("payment request failed: {0}")]
    Transport(String),
}

impl RetryClass for ChargeError {
    fn is_retryable(&self) -> bool {
        matches!(self, ChargeError::RetryableStatus(_) | ChargeError::Transport(_))
    }

    fn status(&self) -> Option<u16> {
        match self {
            ChargeError::RetryableStatus(status) => Some(*status),
            ChargeError::Rejected { status, .. } => Some(*status),
            ChargeError::Transport(_) => None,
        }
    }
}

/// Client for `POST {payment_url}/charge`.
#[derive(Debug, Clone)]
pub struct PaymentClient {
    client: reqwest::Client,
    charge_url: String,
}

impl PaymentClient {
    pub fn new(payment_url: &str) -> Result<Self, OrderError> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|err| OrderError::Config(format!("building payment client: {err}")))?;

        Ok(Self { client, charge_url: format!("{}/charge", payment_url.trim_end_matches('/')) })
    }

    /// Issue one charge attempt; returns the 2xx status on success.
    ///
    /// The response body is always drained so the connection returns to the
    /// pool regardless of outcome.
    pub async fn charge(&self, request: &ChargeRequest) -> Result<u16, ChargeError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inject_trace_context(&mut headers);

        let response = self
            .client
            .post(&self.charge_url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|err| ChargeError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let _ = response.bytes().await;
            debug!(status = status.as_u16(), "charge accepted");
            return Ok(status.as_u16());
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let _ = response.bytes().await;
            return Err(ChargeError::RetryableStatus(status.as_u16()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(ChargeError::Rejected { status: status.as_u16(), body })
    }
}

/// Copy the current span's trace context into outbound headers
/// (W3C `traceparent` / `tracestate`).
fn inject_trace_context(headers: &mut HeaderMap) {
    let context = Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&context, &mut HeaderInjector(headers));
    });
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl opentelemetry::propagation::Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value))
        {
            self.0.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            order_id: "o-1".to_string(),
            merchant_id: "m-1".to_string(),
            amount: 10.0,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn posts_json_to_the_charge_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/charge"))
            .and(header("content-type", "application/json"))
            .and(body_json_string(
                r#"{"order_id":"o-1","merchant_id":"m-1","amount":10.0,"currency":"USD"}"#,
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = PaymentClient::new(&server.uri()).expect("payment client");
        let status = client.charge(&charge_request()).await.expect("charge accepted");

        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn server_errors_and_429_are_retryable() {
        for status in [500u16, 502, 503, 429] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let client = PaymentClient::new(&server.uri()).expect("payment client");
            let error = client.charge(&charge_request()).await.expect_err("must fail");

            assert!(matches!(error, ChargeError::RetryableStatus(s) if s == status));
            assert!(error.is_retryable());
        }
    }

    #[tokio::test]
    async fn client_errors_are_terminal_and_carry_the_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad amount"))
            .mount(&server)
            .await;

        let client = PaymentClient::new(&server.uri()).expect("payment client");
        let error = client.charge(&charge_request()).await.expect_err("must fail");

        match &error {
            ChargeError::Rejected { status, body } => {
                assert_eq!(*status, 400);
                assert_eq!(body, "bad amount");
            }
            other => panic!("expected terminal rejection, got {other:?}"),
        }
        assert!(!error.is_retryable());
        assert_eq!(error.status(), Some(400));
    }

    #[tokio::test]
    async fn connection_failures_are_retryable_transport_errors() {
        // bind and immediately release a port so the connect is refused
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = PaymentClient::new(&format!("http://{addr}")).expect("payment client");
        let error = client.charge(&charge_request()).await.expect_err("must fail");

        assert!(matches!(error, ChargeError::Transport(_)));
        assert!(error.is_retryable());
        assert_eq!(error.status(), None);
    }
}
