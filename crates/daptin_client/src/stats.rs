//! Table statistics passthrough.

use crate::api::ApiContext;
use crate::error::ClientResult;
use crate::transport::HttpRequest;
use serde_json::Value;
use tracing::debug;

/// Query parameters of a stats call; keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsRequest {
    params: Vec<(String, String)>,
}

impl StatsRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one `key=value` pair.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Adds `key=value` once per value.
    pub fn params<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params
            .extend(values.into_iter().map(|v| (key.to_string(), v.into())));
        self
    }

    /// Returns the pairs in insertion order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Fetches aggregate statistics of a table.
#[derive(Debug, Clone)]
pub struct StatsManager {
    api: ApiContext,
}

impl StatsManager {
    /// Creates a stats client.
    pub fn new(api: ApiContext) -> Self {
        Self { api }
    }

    /// Calls `GET /stats/{table}` with every pair of `request` as a query parameter.
    pub async fn stats(&self, table_name: &str, request: &StatsRequest) -> ClientResult<Value> {
        let query: Vec<(&str, &str)> = request
            .pairs()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = self.api.url(&["stats", table_name], &query)?;
        debug!(table_name, params = query.len(), "stats request");
        let request = self.api.authorized(HttpRequest::get(url))?;
        self.api.send_json(request).await
    }
}
