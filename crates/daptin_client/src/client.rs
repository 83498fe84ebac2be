//! Bootstrap wiring every manager to one shared context.

use crate::actions::ActionManager;
use crate::aggregate::AggregateClient;
use crate::api::ApiContext;
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::http::ReqwestTransport;
use crate::registry::{JsonApiRegistry, ResourceRegistry};
use crate::remote_config::ConfigManager;
use crate::session_store::SessionStore;
use crate::stats::StatsManager;
use crate::token::TokenProvider;
use crate::transport::HttpTransport;
use crate::upload::AssetManager;
use crate::world::WorldManager;
use std::fmt;
use std::sync::Arc;

/// Entry point of the SDK.
///
/// ```no_run
/// use daptin_client::{ClientConfig, DaptinClient, MemorySessionStore, StoredToken};
/// use std::sync::Arc;
///
/// # async fn run() -> daptin_client::ClientResult<()> {
/// let store = Arc::new(MemorySessionStore::new());
/// let client = DaptinClient::new(
///     ClientConfig::new("http://localhost:6336"),
///     Arc::new(StoredToken::new(store.clone())),
///     store,
/// )?;
/// client.worlds().init().await;
/// let worlds = client.worlds().load_models(false).await?;
/// println!("{} tables", worlds.len());
/// # Ok(())
/// # }
/// ```
pub struct DaptinClient {
    api: ApiContext,
    registry: Arc<dyn ResourceRegistry>,
    actions: Arc<ActionManager>,
    worlds: Arc<WorldManager>,
    assets: Arc<AssetManager>,
    stats: StatsManager,
    remote_config: ConfigManager,
    aggregate: AggregateClient,
}

impl fmt::Debug for DaptinClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaptinClient")
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

impl DaptinClient {
    /// Builds a client over HTTP.
    ///
    /// API traffic and third-party storage traffic get separate transports.
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        store: Arc<dyn SessionStore>,
    ) -> ClientResult<Self> {
        let api_transport = Arc::new(ReqwestTransport::new(&config)?);
        let storage_transport = Arc::new(ReqwestTransport::new(&config)?);
        let api = ApiContext::new(config, api_transport, tokens);
        let registry = Arc::new(JsonApiRegistry::new(api.clone()));
        Ok(Self::assemble(api, storage_transport, registry, store))
    }

    /// Builds a client over injected transports and registry.
    pub fn with_transports(
        config: ClientConfig,
        api_transport: Arc<dyn HttpTransport>,
        storage_transport: Arc<dyn HttpTransport>,
        registry: Arc<dyn ResourceRegistry>,
        tokens: Arc<dyn TokenProvider>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let api = ApiContext::new(config, api_transport, tokens);
        Self::assemble(api, storage_transport, registry, store)
    }

    fn assemble(
        api: ApiContext,
        storage: Arc<dyn HttpTransport>,
        registry: Arc<dyn ResourceRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let actions = Arc::new(ActionManager::new(api.clone()));
        let worlds = Arc::new(WorldManager::new(
            api.clone(),
            registry.clone(),
            actions.clone(),
        ));
        let assets = Arc::new(AssetManager::new(api.clone(), storage, store));
        Self {
            stats: StatsManager::new(api.clone()),
            remote_config: ConfigManager::new(api.clone()),
            aggregate: AggregateClient::new(api.clone()),
            api,
            registry,
            actions,
            worlds,
            assets,
        }
    }

    /// Returns the shared request context.
    pub fn api(&self) -> &ApiContext {
        &self.api
    }

    /// Returns the resource registry.
    pub fn registry(&self) -> &Arc<dyn ResourceRegistry> {
        &self.registry
    }

    /// Returns the Action Dispatcher.
    pub fn actions(&self) -> &Arc<ActionManager> {
        &self.actions
    }

    /// Returns the Model Synchronization Engine.
    pub fn worlds(&self) -> &Arc<WorldManager> {
        &self.worlds
    }

    /// Returns the Asset Upload Engine.
    pub fn assets(&self) -> &Arc<AssetManager> {
        &self.assets
    }

    /// Returns the stats client.
    pub fn stats(&self) -> &StatsManager {
        &self.stats
    }

    /// Returns the server configuration client.
    pub fn remote_config(&self) -> &ConfigManager {
        &self.remote_config
    }

    /// Returns the aggregation client.
    pub fn aggregate(&self) -> &AggregateClient {
        &self.aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::session_store::MemorySessionStore;
    use crate::token::StaticToken;
    use crate::transport::{Method, MockReply, MockTransport};
    use serde_json::json;

    #[test]
    fn new_builds_over_http() {
        let store = Arc::new(MemorySessionStore::new());
        let client = DaptinClient::new(
            ClientConfig::new("http://localhost:6336"),
            Arc::new(StaticToken::none()),
            store,
        )
        .unwrap();
        assert_eq!(client.api().endpoint(), "http://localhost:6336");
        assert!(client.worlds().worlds().is_empty());
    }

    #[tokio::test]
    async fn model_loads_feed_the_shared_action_map() {
        let api = Arc::new(MockTransport::new());
        api.on(
            Method::Get,
            "/jsmodel/todo.js",
            MockReply::json(json!({
                "ColumnModel": {},
                "Actions": [{"OnType": "todo", "Name": "archive", "Label": "Archive"}]
            })),
        );
        let client = DaptinClient::with_transports(
            ClientConfig::new("http://localhost:6336"),
            api,
            Arc::new(MockTransport::new()),
            Arc::new(MemoryRegistry::new()),
            Arc::new(StaticToken::new("jwt")),
            Arc::new(MemorySessionStore::new()),
        );

        client.worlds().load_model("todo", false).await.unwrap();
        assert!(client.actions().action_model("todo", "archive").is_some());
        assert!(client.registry().definition("todo").is_some());
    }
}
