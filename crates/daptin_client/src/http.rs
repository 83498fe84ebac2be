//! HTTP transport implementation.
//!
//! [`ReqwestTransport`] sends [`HttpRequest`]s through a `reqwest` client.
//! Streamed bodies are forwarded chunk by chunk, so a source is read only
//! as fast as the connection drains it.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{ByteStream, HttpRequest, HttpResponse, HttpTransport, Method, RequestBody};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

/// HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    request_timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Creates a transport with the timeouts and user agent of `config`.
    ///
    /// The connect timeout bounds every request. The total timeout only
    /// bounds requests without an upload body, so a slow transfer is never
    /// cut off midway.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            client,
            request_timeout: Some(config.timeout),
        })
    }

    /// Wraps an existing `reqwest` client, adding no timeouts of its own.
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            request_timeout: None,
        }
    }

    /// Returns the total timeout applied to a request carrying `body`.
    pub fn timeout_for(&self, body: &RequestBody) -> Option<Duration> {
        match body {
            RequestBody::Empty | RequestBody::Json(_) => self.request_timeout,
            RequestBody::Bytes(_) | RequestBody::Stream { .. } => None,
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Makes a `Send`-only stream `Sync`, as `Body::wrap_stream` requires.
///
/// The stream is only ever polled through `&mut self`, so the lock is never
/// contended.
struct SyncStream(Mutex<ByteStream>);

impl Stream for SyncStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().0.get_mut().as_mut().poll_next(cx)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self
            .client
            .request(reqwest_method(request.method), request.url.as_str());
        if let Some(timeout) = self.timeout_for(&request.body) {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream { stream, length } => builder
                .header(CONTENT_LENGTH, length)
                .body(Body::wrap_stream(SyncStream(Mutex::new(stream)))),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        debug!(status, bytes = body.len(), "received response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn builds_from_config() {
        let config = ClientConfig::new("http://localhost:6336");
        assert!(ReqwestTransport::new(&config).is_ok());
    }

    #[test]
    fn upload_bodies_carry_no_total_timeout() {
        let config = ClientConfig::new("http://localhost:6336").with_timeout(Duration::from_secs(7));
        let transport = ReqwestTransport::new(&config).unwrap();

        let stream = RequestBody::Stream {
            stream: futures::stream::empty().boxed(),
            length: 0,
        };
        assert_eq!(transport.timeout_for(&stream), None);
        assert_eq!(transport.timeout_for(&RequestBody::Bytes(Bytes::from_static(b"part"))), None);
        assert_eq!(transport.timeout_for(&RequestBody::Empty), Some(Duration::from_secs(7)));
        assert_eq!(
            transport.timeout_for(&RequestBody::Json(serde_json::json!({}))),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn wrapped_client_adds_no_timeout() {
        let transport = ReqwestTransport::from_client(Client::new());
        assert_eq!(transport.timeout_for(&RequestBody::Empty), None);
    }

    #[test]
    fn method_mapping() {
        assert_eq!(reqwest_method(Method::Put), reqwest::Method::PUT);
        assert_eq!(reqwest_method(Method::Delete), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn sync_stream_forwards_chunks() {
        let chunks: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"c"))];
        let mut stream = SyncStream(Mutex::new(futures::stream::iter(chunks).boxed()));

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"abc");
    }
}
