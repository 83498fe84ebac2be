//! Shared request context for every manager.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::token::TokenProvider;
use crate::transport::{ensure_success, HttpRequest, HttpResponse, HttpTransport};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// Endpoint, transport and token source shared by the managers.
#[derive(Clone)]
pub struct ApiContext {
    config: Arc<ClientConfig>,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenProvider>,
}

impl fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiContext")
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}

impl ApiContext {
    /// Creates a context.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            tokens,
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the server endpoint.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Returns the token source.
    pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
        &self.tokens
    }

    fn base(&self) -> ClientResult<Url> {
        Url::parse(&self.config.endpoint).map_err(|e| {
            ClientError::Validation(format!("invalid endpoint {:?}: {e}", self.config.endpoint))
        })
    }

    /// Builds `<endpoint>/<segments...>?<query>`, percent-encoding each part.
    pub fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> ClientResult<String> {
        let mut url = self.base()?;
        url.path_segments_mut()
            .map_err(|()| ClientError::Validation("endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        append_query(&mut url, query);
        Ok(url.into())
    }

    /// Resolves a server-provided path (or absolute URL) against the endpoint.
    pub fn resolve(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<String> {
        let absolute = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.config.endpoint, path.trim_start_matches('/'))
        };
        let mut url = Url::parse(&absolute)
            .map_err(|e| ClientError::Validation(format!("invalid URL {absolute:?}: {e}")))?;
        append_query(&mut url, query);
        Ok(url.into())
    }

    /// Returns the current bearer token, failing with [`ClientError::Auth`] if none.
    pub fn bearer(&self) -> ClientResult<String> {
        self.tokens
            .token()
            .ok_or_else(|| ClientError::Auth("no token available".into()))
    }

    /// Adds the bearer header, failing before any I/O when there is no token.
    pub fn authorized(&self, request: HttpRequest) -> ClientResult<HttpRequest> {
        let token = self.bearer()?;
        Ok(request.header("Authorization", format!("Bearer {token}")))
    }

    /// Adds the bearer header only when a token is available.
    pub fn maybe_authorized(&self, request: HttpRequest) -> HttpRequest {
        match self.tokens.token() {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    /// Sends a request and maps non-2xx statuses to errors.
    pub async fn send(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        ensure_success(self.transport.send(request).await?)
    }

    /// Sends a request and decodes a JSON response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> ClientResult<T> {
        self.send(request).await?.json()
    }
}

fn append_query(url: &mut Url, query: &[(&str, &str)]) {
    if query.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in query {
        pairs.append_pair(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticToken;
    use crate::transport::MockTransport;

    fn context(endpoint: &str, token: StaticToken) -> ApiContext {
        ApiContext::new(
            ClientConfig::new(endpoint),
            Arc::new(MockTransport::new()),
            Arc::new(token),
        )
    }

    #[test]
    fn builds_encoded_urls() {
        let ctx = context("http://localhost:6336", StaticToken::none());
        let url = ctx
            .url(
                &["asset", "document", "r-1", "file", "upload"],
                &[("operation", "init"), ("filename", "my report.pdf")],
            )
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:6336/asset/document/r-1/file/upload?operation=init&filename=my+report.pdf"
        );

        let url = ctx.url(&["jsmodel", "user_account.js"], &[]).unwrap();
        assert_eq!(url, "http://localhost:6336/jsmodel/user_account.js");
    }

    #[test]
    fn keeps_endpoint_path_prefix() {
        let ctx = context("https://example.com/daptin", StaticToken::none());
        assert_eq!(
            ctx.url(&["actions"], &[]).unwrap(),
            "https://example.com/daptin/actions"
        );
        assert_eq!(
            ctx.resolve("/asset/x/upload", &[("part_number", "2")]).unwrap(),
            "https://example.com/daptin/asset/x/upload?part_number=2"
        );
        assert_eq!(
            ctx.resolve("https://s3.example.com/part", &[]).unwrap(),
            "https://s3.example.com/part"
        );
    }

    #[test]
    fn authorized_requires_token() {
        let ctx = context("http://localhost", StaticToken::none());
        let err = ctx.authorized(HttpRequest::get("http://localhost/x")).unwrap_err();
        assert!(err.is_auth());

        let ctx = context("http://localhost", StaticToken::new("jwt"));
        let request = ctx.authorized(HttpRequest::get("http://localhost/x")).unwrap();
        assert_eq!(request.header_value("authorization"), Some("Bearer jwt"));
    }
}
