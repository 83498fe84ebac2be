//! Server configuration passthrough.

use crate::api::ApiContext;
use crate::error::ClientResult;
use crate::transport::HttpRequest;
use serde_json::Value;

/// Reads and writes named server configuration entries.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    api: ApiContext,
}

impl ConfigManager {
    /// Creates a config client.
    pub fn new(api: ApiContext) -> Self {
        Self { api }
    }

    fn url(&self, name: &str, kind: &str) -> ClientResult<String> {
        self.api.url(&["_config", kind, name], &[])
    }

    /// Fetches `/_config/{kind}/{name}`.
    pub async fn get_config(&self, name: &str, kind: &str) -> ClientResult<Value> {
        let request = self.api.authorized(HttpRequest::get(self.url(name, kind)?))?;
        self.api.send_json(request).await
    }

    /// Writes `value` to `/_config/{kind}/{name}`.
    pub async fn set_config(&self, name: &str, kind: &str, value: Value) -> ClientResult<Value> {
        let request = self
            .api
            .authorized(HttpRequest::post(self.url(name, kind)?))?
            .json(value);
        self.api.send_json(request).await
    }
}
