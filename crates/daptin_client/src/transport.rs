//! Transport layer abstraction for HTTP traffic.
//!
//! Every manager talks to the network through [`HttpTransport`], which allows
//! different implementations (reqwest, mock for testing, etc.). Status code
//! mapping happens in the caller through [`ensure_success`].

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Parses a method name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream of body chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Body of an outgoing request.
pub enum RequestBody {
    /// No body.
    Empty,
    /// A JSON document.
    Json(Value),
    /// Raw bytes held in memory.
    Bytes(Bytes),
    /// Raw bytes produced lazily while the transport sends them.
    Stream {
        /// Chunk source.
        stream: ByteStream,
        /// Total number of bytes the stream yields.
        length: u64,
    },
}

impl RequestBody {
    /// Returns the body length when it is known.
    pub fn len(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Json(_) => None,
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Stream { length, .. } => Some(*length),
        }
    }

    /// Returns true if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            RequestBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            RequestBody::Stream { length, .. } => write!(f, "Stream({length} bytes)"),
        }
    }
}

/// An outgoing HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
}

impl HttpRequest {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body.
    pub fn json(mut self, value: Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Sets an in-memory body.
    pub fn bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(bytes.into());
        self
    }

    /// Sets a streamed body of `length` bytes.
    pub fn stream(mut self, stream: ByteStream, length: u64) -> Self {
        self.body = RequestBody::Stream { stream, length };
        self
    }

    /// Looks up a header value, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers with lowercased names.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header; the name is lowercased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends HTTP requests.
///
/// Implementations return `Err(ClientError::Network)` only when no response
/// was received; every status code is returned as a response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends one request.
    async fn send(&self, request: HttpRequest) -> ClientResult<HttpResponse>;
}

fn error_message(body: &Value) -> Option<String> {
    let direct = ["message", "error", "detail", "title"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str));
    if let Some(message) = direct {
        return Some(message.to_string());
    }
    let first = body.get("errors")?.as_array()?.first()?;
    ["detail", "title", "message"]
        .iter()
        .find_map(|key| first.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Maps a non-2xx response to an error.
///
/// 401 and 403 become [`ClientError::Auth`]; any other failure becomes
/// [`ClientError::Server`] carrying the JSON error body when there is one.
pub fn ensure_success(response: HttpResponse) -> ClientResult<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let body: Option<Value> = serde_json::from_slice(&response.body).ok();
    let message = body
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| {
            let text = response.text();
            if text.trim().is_empty() {
                format!("request failed with status {}", response.status)
            } else {
                text
            }
        });

    match response.status {
        401 | 403 => Err(ClientError::Auth(message)),
        status => Err(ClientError::Server {
            status,
            message,
            body,
        }),
    }
}

/// An ordered log of events shared between test doubles.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns every entry in order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }
}

/// A scripted reply served by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockReply {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Bytes,
    delay: Option<Duration>,
    network_error: Option<String>,
}

impl MockReply {
    /// A reply with the given status and an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Bytes::new(),
            delay: None,
            network_error: None,
        }
    }

    /// A 200 reply carrying a JSON document.
    pub fn json(value: Value) -> Self {
        Self::status(200)
            .with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// A failure where no response arrives.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            network_error: Some(message.into()),
            ..Self::status(0)
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Holds the reply back for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct Route {
    method: Method,
    fragment: String,
    replies: VecDeque<MockReply>,
}

/// A request as seen by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// The body bytes; JSON bodies are serialized.
    pub body: Bytes,
    /// Size of every chunk a streamed body yielded.
    pub chunk_sizes: Vec<usize>,
}

impl RecordedRequest {
    /// Looks up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Decodes the body as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// A mock transport for testing.
///
/// Replies are scripted per method and URL fragment; the longest matching
/// fragment wins. Queued replies are served in order and the last one is
/// repeated. Unmatched requests get a 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    journal: Option<Journal>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock transport that records `start`/`end` entries into `journal`.
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// Queues a reply for requests whose URL contains `fragment`.
    pub fn on(&self, method: Method, fragment: impl Into<String>, reply: MockReply) -> &Self {
        let fragment = fragment.into();
        let mut routes = self.routes.lock();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.fragment == fragment)
        {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(Route {
                method,
                fragment,
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the requests whose URL contains `fragment`.
    pub fn requests_to(&self, fragment: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .cloned()
            .collect()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the highest number of requests that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, method: Method, url: &str) -> MockReply {
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == method && url.contains(r.fragment.as_str()))
            .max_by_key(|r| r.fragment.len());
        match route {
            Some(route) if route.replies.len() > 1 => {
                route.replies.pop_front().unwrap_or_else(|| MockReply::status(404))
            }
            Some(route) => route
                .replies
                .front()
                .cloned()
                .unwrap_or_else(|| MockReply::status(404)),
            None => MockReply::status(404)
                .with_body(format!(r#"{{"message":"no mock route for {method} {url}"}}"#)),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let label = format!("{} {}", request.method, request.url);
        if let Some(journal) = &self.journal {
            journal.record(format!("start {label}"));
        }

        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut chunk_sizes = Vec::new();
        let body = match body {
            RequestBody::Empty => Bytes::new(),
            RequestBody::Json(value) => Bytes::from(value.to_string()),
            RequestBody::Bytes(bytes) => bytes,
            RequestBody::Stream { mut stream, .. } => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| ClientError::Network(e.to_string()))?;
                    chunk_sizes.push(chunk.len());
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        };

        let reply = self.next_reply(method, &url);
        self.requests.lock().push(RecordedRequest {
            method,
            url,
            headers,
            body,
            chunk_sizes,
        });

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(journal) = &self.journal {
            journal.record(format!("end {label}"));
        }

        if let Some(message) = reply.network_error {
            return Err(ClientError::Network(message));
        }

        Ok(HttpResponse {
            status: reply.status,
            headers: reply.headers,
            body: reply.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_success_maps_statuses() {
        assert!(ensure_success(HttpResponse::new(204, "")).is_ok());

        let err = ensure_success(HttpResponse::new(401, r#"{"message":"token expired"}"#))
            .unwrap_err();
        assert!(matches!(err, ClientError::Auth(ref m) if m == "token expired"));

        let err = ensure_success(HttpResponse::new(403, "")).unwrap_err();
        assert!(err.is_auth());

        let err = ensure_success(HttpResponse::new(
            500,
            r#"{"errors":[{"title":"db down","status":"500"}]}"#,
        ))
        .unwrap_err();
        match err {
            ClientError::Server {
                status,
                message,
                body,
            } => {
                assert_eq!(status, 500);
                assert_eq!(message, "db down");
                assert!(body.is_some());
            }
            other => panic!("expected server error, got {other:?}"),
        }

        let err = ensure_success(HttpResponse::new(502, "bad gateway")).unwrap_err();
        assert!(matches!(err, ClientError::Server { ref message, body: None, .. } if message == "bad gateway"));
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let response = HttpResponse::new(200, "").with_header("ETag", "\"abc\"");
        assert_eq!(response.header("etag"), Some("\"abc\""));
        assert_eq!(response.header("ETAG"), Some("\"abc\""));
    }

    #[test]
    fn method_parsing() {
        assert_eq!(Method::parse("put"), Some(Method::Put));
        assert_eq!(Method::parse("OPTIONS"), None);
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[tokio::test]
    async fn mock_transport_serves_queued_replies() {
        let transport = MockTransport::new();
        transport
            .on(Method::Get, "/api/world", MockReply::json(json!({"n": 1})))
            .on(Method::Get, "/api/world", MockReply::json(json!({"n": 2})));

        let first = transport
            .send(HttpRequest::get("http://x/api/world"))
            .await
            .unwrap();
        let second = transport
            .send(HttpRequest::get("http://x/api/world"))
            .await
            .unwrap();
        let third = transport
            .send(HttpRequest::get("http://x/api/world"))
            .await
            .unwrap();

        assert_eq!(first.json::<Value>().unwrap()["n"], 1);
        assert_eq!(second.json::<Value>().unwrap()["n"], 2);
        assert_eq!(third.json::<Value>().unwrap()["n"], 2);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn mock_transport_prefers_longest_fragment() {
        let transport = MockTransport::new();
        transport
            .on(Method::Get, "/api/", MockReply::status(500))
            .on(Method::Get, "/api/world", MockReply::status(200));

        let response = transport
            .send(HttpRequest::get("http://x/api/world?page=1"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let response = transport
            .send(HttpRequest::post("http://x/api/world"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn mock_transport_drains_streams() {
        let transport = MockTransport::new();
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cde")),
        ];
        let request = HttpRequest::new(Method::Put, "http://x/upload")
            .stream(futures::stream::iter(chunks).boxed(), 5);

        transport.send(request).await.unwrap();

        let recorded = &transport.requests()[0];
        assert_eq!(&recorded.body[..], b"abcde");
        assert_eq!(recorded.chunk_sizes, vec![2, 3]);
    }

    #[tokio::test]
    async fn mock_transport_network_error() {
        let transport = MockTransport::new();
        transport.on(Method::Get, "/", MockReply::network_error("connection reset"));

        let err = transport
            .send(HttpRequest::get("http://x/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }
}
