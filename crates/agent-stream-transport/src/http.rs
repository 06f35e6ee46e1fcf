//! Streaming HTTP transport adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Transport failure. All variants are terminal for the run.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("network failure mid-stream: {0}")]
    Network(#[source] reqwest::Error),
}

/// One notification from an open streaming connection.
#[derive(Debug, Clone)]
pub enum StreamNotification {
    /// Response headers arrived. Emitted exactly once, first.
    Open {
        status: u16,
        headers: HashMap<String, String>,
    },
    /// One chunk of the response body.
    Chunk(Bytes),
}

/// Request parameters for one streaming connection.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub method: reqwest::Method,
    /// Caller headers; fixed protocol headers are merged on top.
    pub headers: HashMap<String, String>,
    /// JSON body; sets `Content-Type: application/json` when present.
    pub body: Option<Value>,
}

impl StreamRequest {
    /// POST request with a JSON body, the common case.
    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::POST,
            headers: HashMap::new(),
            body: Some(body),
        }
    }
}

/// Ordered, cancellable notification sequence from one connection.
pub type NotificationStream = BoxStream<'static, Result<StreamNotification, TransportError>>;

/// Opens streaming connections.
///
/// Implementations must emit exactly one `Open` followed by zero or
/// more `Chunk`s, stop emitting as soon as the token is cancelled, and
/// surface non-2xx responses and mid-stream failures as errors rather
/// than swallowing them.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open the connection and return its notification stream.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established or the
    /// server rejects the request.
    async fn open(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<NotificationStream, TransportError>;
}

/// `StreamTransport` over a reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport reusing an existing client (connection pools,
    /// proxies, TLS configuration).
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<NotificationStream, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = builder.header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(url = %request.url, "cancelled before connect");
                return Ok(futures::stream::empty().boxed());
            }
            result = builder.send() => result.map_err(TransportError::Connect)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let status = status.as_u16();
        tracing::debug!(url = %request.url, status, "stream open");

        let mut chunks = response.bytes_stream();
        let stream = async_stream::stream! {
            yield Ok(StreamNotification::Open { status, headers });
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!("stream cancelled");
                        break;
                    }
                    next = chunks.next() => match next {
                        Some(Ok(chunk)) => yield Ok(StreamNotification::Chunk(chunk)),
                        Some(Err(e)) => {
                            yield Err(TransportError::Network(e));
                            break;
                        }
                        None => break,
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Build the failure for a non-2xx response.
///
/// Policy: the body is read and, when it is a JSON object with a
/// `message` or `error` string, that text becomes the detail; any other
/// body is carried verbatim. The request always fails either way.
fn status_error(status: u16, body: String) -> TransportError {
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or(body);
    TransportError::Status { status, detail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str =
        "data: {\"type\":\"RUN_STARTED\",\"threadId\":\"t1\",\"runId\":\"r1\"}\n\n";

    async fn collect(stream: NotificationStream) -> Vec<Result<StreamNotification, TransportError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_open_then_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(BODY, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new();
        let request = StreamRequest::post(format!("{}/run", server.uri()), serde_json::json!({}));
        let stream = transport
            .open(request, CancellationToken::new())
            .await
            .unwrap();

        let notifications = collect(stream).await;
        let Ok(StreamNotification::Open { status, .. }) = &notifications[0] else {
            panic!("expected Open first, got {:?}", notifications[0]);
        };
        assert_eq!(*status, 200);

        let mut data = Vec::new();
        for n in &notifications[1..] {
            match n {
                Ok(StreamNotification::Chunk(chunk)) => data.extend_from_slice(chunk),
                other => panic!("unexpected notification: {other:?}"),
            }
        }
        assert_eq!(data, BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_structured_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(422).set_body_string(r#"{"message":"bad input"}"#),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new();
        let request = StreamRequest::post(server.uri(), serde_json::json!({}));
        let err = match transport.open(request, CancellationToken::new()).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };

        match err {
            TransportError::Status { status, detail } => {
                assert_eq!(status, 422);
                assert_eq!(detail, "bad input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_error_body_is_carried_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of capacity"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new();
        let request = StreamRequest::post(server.uri(), serde_json::json!({}));
        let err = match transport.open(request, CancellationToken::new()).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };

        match err {
            TransportError::Status { status, detail } => {
                assert_eq!(status, 500);
                assert_eq!(detail, "out of capacity");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_connect_yields_empty_stream() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let transport = HttpTransport::new();
        let request = StreamRequest::post("http://127.0.0.1:9/run", serde_json::json!({}));
        let mut stream = transport.open(request, cancel).await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
