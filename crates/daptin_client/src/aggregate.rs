//! Aggregation passthrough.

use crate::api::ApiContext;
use crate::error::ClientResult;
use crate::transport::HttpRequest;
use daptin_protocol::AggregateRequest;
use serde_json::Value;
use tracing::debug;

/// Runs aggregation queries against `/aggregate/{entity}`.
#[derive(Debug, Clone)]
pub struct AggregateClient {
    api: ApiContext,
}

impl AggregateClient {
    /// Creates an aggregation client.
    pub fn new(api: ApiContext) -> Self {
        Self { api }
    }

    /// Executes `request` and returns the response's `data` member.
    ///
    /// A request without a root entity fails before anything is sent.
    pub async fn execute(&self, request: &AggregateRequest) -> ClientResult<Value> {
        request.validate()?;
        let url = self.api.url(&["aggregate", &request.root_entity], &[])?;
        let body = serde_json::to_value(request)?;
        debug!(entity = %request.root_entity, "aggregate request");

        let http = self.api.maybe_authorized(HttpRequest::post(url).json(body));
        let mut response: Value = self.api.send_json(http).await?;
        Ok(response
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}
