//! Configuration for the client.

use std::time::Duration;

/// Default key prefix of persisted resumable sessions.
pub const DEFAULT_SESSION_KEY_PREFIX: &str = "daptin_upload";

/// Configuration for a Daptin client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoint (e.g., "https://api.example.com"), without trailing slash.
    pub endpoint: String,
    /// Total timeout of requests that carry no upload body.
    pub timeout: Duration,
    /// Timeout for establishing a connection; applies to every request.
    pub connect_timeout: Duration,
    /// Key prefix of persisted resumable sessions.
    pub session_key_prefix: String,
    /// Read size when streaming a source; also the progress granularity.
    pub stream_chunk_size: usize,
    /// Page size used when listing the table and stream catalogs.
    pub catalog_page_size: u32,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            session_key_prefix: DEFAULT_SESSION_KEY_PREFIX.to_string(),
            stream_chunk_size: 256 * 1024,
            catalog_page_size: 500,
            user_agent: format!("daptin-client-rs/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the resumable session key prefix.
    pub fn with_session_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_key_prefix = prefix.into();
        self
    }

    /// Sets the streaming read size. Zero is raised to one byte.
    pub fn with_stream_chunk_size(mut self, size: usize) -> Self {
        self.stream_chunk_size = size.max(1);
        self
    }

    /// Sets the catalog page size.
    pub fn with_catalog_page_size(mut self, size: u32) -> Self {
        self.catalog_page_size = size;
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns the JSON:API root (`<endpoint>/api`).
    pub fn api_root(&self) -> String {
        format!("{}/api", self.endpoint)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:6336")
    }
}
