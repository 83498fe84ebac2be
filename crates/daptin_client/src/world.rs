//! Model Synchronization Engine.
//!
//! Discovers the server's schema, caches per-type descriptors and registers
//! derived field maps with the resource registry.
//!
//! ## Key Invariants
//!
//! - Descriptors are cached per type and only refetched on `force`
//! - `user_account`, `usergroup` and `world` load strictly in that order;
//!   everything after is fanned out concurrently
//! - Join tables are never registered on their own
//! - Fan-in operations fail as a whole on the first error

use crate::actions::ActionManager;
use crate::api::ApiContext;
use crate::error::{ClientError, ClientResult};
use crate::registry::{ListQuery, Resource, ResourceRegistry};
use crate::transport::HttpRequest;
use daptin_protocol::{
    is_join_table, ActionDescriptor, ColumnEntry, FieldMap, FieldSpec, StateMachine,
    StreamDescriptor, TypeDescriptor, World,
};
use futures::future::{try_join, try_join_all};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Types that must be registered, in order, before the catalog is read.
pub const BOOTSTRAP_TYPES: [&str; 3] = ["user_account", "usergroup", "world"];

/// Name of the built-in image pseudo-type.
pub const IMAGE_TYPE: &str = "image.png|jpg|jpeg|gif|tiff";

fn image_fields() -> FieldMap {
    ["__type", "contents", "name", "reference_id", "src", "type"]
        .into_iter()
        .map(|name| (name.to_string(), FieldSpec::Scalar("value".to_string())))
        .collect()
}

fn decode_resource<T: serde::de::DeserializeOwned>(resource: Resource) -> ClientResult<T> {
    Ok(serde_json::from_value(Value::Object(resource))?)
}

/// Mirrors the server's data model locally.
pub struct WorldManager {
    api: ApiContext,
    registry: Arc<dyn ResourceRegistry>,
    actions: Arc<ActionManager>,
    column_keys: RwLock<BTreeMap<String, Arc<TypeDescriptor>>>,
    state_machines: RwLock<BTreeMap<String, Vec<StateMachine>>>,
    state_machine_enabled: RwLock<BTreeMap<String, bool>>,
    worlds: RwLock<BTreeMap<String, World>>,
    system_actions: RwLock<Vec<ActionDescriptor>>,
    column_types: RwLock<Value>,
    streams: RwLock<Vec<StreamDescriptor>>,
}

impl WorldManager {
    /// Creates an engine with empty caches.
    pub fn new(
        api: ApiContext,
        registry: Arc<dyn ResourceRegistry>,
        actions: Arc<ActionManager>,
    ) -> Self {
        Self {
            api,
            registry,
            actions,
            column_keys: RwLock::new(BTreeMap::new()),
            state_machines: RwLock::new(BTreeMap::new()),
            state_machine_enabled: RwLock::new(BTreeMap::new()),
            worlds: RwLock::new(BTreeMap::new()),
            system_actions: RwLock::new(Vec::new()),
            column_types: RwLock::new(Value::Array(Vec::new())),
            streams: RwLock::new(Vec::new()),
        }
    }

    /// Registers the image pseudo-type and loads the column-type catalog.
    ///
    /// A failing catalog fetch is logged, not returned.
    pub async fn init(&self) {
        self.registry.define(IMAGE_TYPE, image_fields());
        if let Err(err) = self.load_column_types().await {
            warn!(error = %err, "failed to load column types");
        }
    }

    /// Fetches the global column-type catalog.
    pub async fn load_column_types(&self) -> ClientResult<Value> {
        let url = self.api.url(&["meta"], &[("query", "column_types")])?;
        let types: Value = self
            .api
            .send_json(self.api.maybe_authorized(HttpRequest::get(url)))
            .await?;
        *self.column_types.write() = types.clone();
        Ok(types)
    }

    /// Returns the descriptor of `type_name`, from cache unless `force`.
    ///
    /// Concurrent calls for the same type are not deduplicated.
    pub async fn column_keys(&self, type_name: &str, force: bool) -> ClientResult<Arc<TypeDescriptor>> {
        if !force {
            if let Some(cached) = self.column_keys.read().get(type_name) {
                return Ok(cached.clone());
            }
        }

        let url = self.api.url(&["jsmodel", &format!("{type_name}.js")], &[])?;
        let descriptor: TypeDescriptor = self
            .api
            .send_json(self.api.maybe_authorized(HttpRequest::get(url)))
            .await?;

        if !descriptor.actions.is_empty() {
            debug!(type_name, actions = descriptor.actions.len(), "registering actions");
            self.actions.add_all_actions(&descriptor.actions);
        }
        self.state_machines
            .write()
            .insert(type_name.to_string(), descriptor.state_machines.clone());
        self.state_machine_enabled
            .write()
            .insert(type_name.to_string(), descriptor.is_state_machine_enabled);

        let descriptor = Arc::new(descriptor);
        self.column_keys
            .write()
            .insert(type_name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Derives the registry field map from a column model.
    pub fn json_api_model(column_model: &BTreeMap<String, ColumnEntry>) -> FieldMap {
        daptin_protocol::json_api_model(column_model)
    }

    async fn register(&self, type_name: &str, force: bool) -> ClientResult<FieldMap> {
        let descriptor = self.column_keys(type_name, force).await?;
        let fields = descriptor.json_api_model();
        self.registry.define(type_name, fields.clone());
        debug!(type_name, fields = fields.len(), "model registered");
        Ok(fields)
    }

    /// Fetches and registers one model.
    pub async fn load_model(&self, type_name: &str, force: bool) -> ClientResult<()> {
        self.register(type_name, force).await.map(|_| ())
    }

    /// Fetches and registers several models concurrently; all must succeed.
    pub async fn load_models_named(&self, type_names: &[&str], force: bool) -> ClientResult<()> {
        try_join_all(type_names.iter().map(|name| self.load_model(name, force))).await?;
        Ok(())
    }

    async fn fetch_world_entry(&self, table_name: &str) -> ClientResult<()> {
        let query = ListQuery::new().page(1, 1).filter("table_name", table_name);
        let entry = self
            .registry
            .find_all("world", &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("world {table_name}")))?;
        let world: World = decode_resource(entry)?;
        self.worlds.write().insert(world.table_name.clone(), world);
        Ok(())
    }

    /// Refreshes one table: its catalog entry (if unknown) and its model,
    /// concurrently.
    ///
    /// Join tables resolve to `None` without any network call.
    pub async fn refresh_world(&self, table_name: &str, force: bool) -> ClientResult<Option<FieldMap>> {
        if is_join_table(table_name) {
            return Ok(None);
        }

        let known = self.worlds.read().contains_key(table_name);
        let catalog = async {
            if known {
                Ok(())
            } else {
                self.fetch_world_entry(table_name).await
            }
        };
        let (_, fields) = try_join(catalog, self.register(table_name, force)).await?;
        Ok(Some(fields))
    }

    /// Fetches the table catalog and refreshes every table concurrently.
    pub async fn refresh_worlds(&self, force: bool) -> ClientResult<Vec<World>> {
        let query = ListQuery::new().page(1, self.api.config().catalog_page_size);
        let entries = self.registry.find_all("world", &query).await?;
        if entries.is_empty() {
            return Err(ClientError::EmptyCatalog);
        }

        let worlds = entries
            .into_iter()
            .map(decode_resource::<World>)
            .collect::<ClientResult<Vec<_>>>()?;
        *self.worlds.write() = worlds
            .iter()
            .map(|w| (w.table_name.clone(), w.clone()))
            .collect();

        try_join_all(
            worlds
                .iter()
                .map(|world| self.refresh_world(&world.table_name, force)),
        )
        .await?;
        info!(tables = worlds.len(), "world catalog refreshed");
        Ok(worlds)
    }

    /// Loads the whole schema.
    ///
    /// `user_account`, `usergroup` and `world` are registered strictly in
    /// that order; `world`'s actions become the system actions. Then every
    /// catalog table is refreshed.
    pub async fn load_models(&self, force: bool) -> ClientResult<BTreeMap<String, World>> {
        let [user_account, usergroup, world] = BOOTSTRAP_TYPES;
        self.load_model(user_account, force).await?;
        self.load_model(usergroup, force).await?;

        self.register(world, force).await?;
        if let Some(descriptor) = self.column_keys.read().get(world) {
            *self.system_actions.write() = descriptor.actions.clone();
        }

        self.refresh_worlds(force).await?;
        Ok(self.worlds.read().clone())
    }

    /// Registers `stream`, lists the streams, then registers each stream's
    /// model concurrently.
    pub async fn load_streams(&self, force: bool) -> ClientResult<Vec<StreamDescriptor>> {
        self.load_model("stream", force).await?;

        let query = ListQuery::new().page(1, self.api.config().catalog_page_size);
        let streams = self
            .registry
            .find_all("stream", &query)
            .await?
            .into_iter()
            .map(decode_resource::<StreamDescriptor>)
            .collect::<ClientResult<Vec<_>>>()?;
        *self.streams.write() = streams.clone();

        try_join_all(
            streams
                .iter()
                .map(|stream| self.load_model(&stream.stream_name, force)),
        )
        .await?;
        info!(streams = streams.len(), "streams loaded");
        Ok(streams)
    }

    /// Starts state tracking of an object.
    pub async fn start_object_track(
        &self,
        type_name: &str,
        reference_id: &str,
        state_machine_id: &str,
    ) -> ClientResult<Value> {
        let url = self.api.url(&["track", "start", state_machine_id], &[])?;
        let request = self
            .api
            .authorized(HttpRequest::post(url))?
            .json(json!({"typeName": type_name, "referenceId": reference_id}));
        self.api.send_json(request).await
    }

    /// Fires `event` on a tracked object state.
    pub async fn track_object_event(
        &self,
        type_name: &str,
        object_state_id: &str,
        event: &str,
    ) -> ClientResult<Value> {
        let url = self
            .api
            .url(&["track", "event", type_name, object_state_id, event], &[])?;
        let request = self.api.authorized(HttpRequest::post(url))?;
        self.api.send_json(request).await
    }

    /// Returns the cached descriptor of a type.
    pub fn cached_type(&self, type_name: &str) -> Option<Arc<TypeDescriptor>> {
        self.column_keys.read().get(type_name).cloned()
    }

    /// Returns the state machines of a type; empty before it is loaded.
    pub fn state_machines_for_type(&self, type_name: &str) -> Vec<StateMachine> {
        self.state_machines
            .read()
            .get(type_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns whether state machines are enabled for a type.
    pub fn is_state_machine_enabled(&self, type_name: &str) -> bool {
        self.state_machine_enabled
            .read()
            .get(type_name)
            .copied()
            .unwrap_or(false)
    }

    /// Returns a catalog entry by table name.
    pub fn world_by_name(&self, table_name: &str) -> Option<World> {
        self.worlds.read().get(table_name).cloned()
    }

    /// Returns every known catalog entry.
    pub fn worlds(&self) -> Vec<World> {
        self.worlds.read().values().cloned().collect()
    }

    /// Returns the actions of the `world` type.
    pub fn system_actions(&self) -> Vec<ActionDescriptor> {
        self.system_actions.read().clone()
    }

    /// Returns the column-type catalog; an empty array before it is loaded.
    pub fn column_field_types(&self) -> Value {
        self.column_types.read().clone()
    }

    /// Returns the streams found by the last [`WorldManager::load_streams`].
    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.streams.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::registry::MemoryRegistry;
    use crate::token::StaticToken;
    use crate::transport::{Method, MockReply, MockTransport};

    fn setup() -> (Arc<MockTransport>, Arc<MemoryRegistry>, WorldManager) {
        let transport = Arc::new(MockTransport::new());
        let registry = Arc::new(MemoryRegistry::new());
        let api = ApiContext::new(
            ClientConfig::new("http://localhost:6336"),
            transport.clone(),
            Arc::new(StaticToken::new("jwt")),
        );
        let actions = Arc::new(ActionManager::new(api.clone()));
        let manager = WorldManager::new(api, registry.clone(), actions);
        (transport, registry, manager)
    }

    fn descriptor(actions: Value) -> MockReply {
        MockReply::json(json!({
            "ColumnModel": {
                "title": {"ColumnName": "title", "ColumnType": "label", "IsNullable": true}
            },
            "Actions": actions,
            "StateMachines": [{"name": "review", "label": "Review"}],
            "IsStateMachineEnabled": true
        }))
    }

    #[test]
    fn readers_are_empty_before_load() {
        let (transport, _, manager) = setup();
        assert!(manager.worlds().is_empty());
        assert!(manager.world_by_name("user_account").is_none());
        assert!(manager.system_actions().is_empty());
        assert!(manager.state_machines_for_type("todo").is_empty());
        assert!(!manager.is_state_machine_enabled("todo"));
        assert_eq!(manager.column_field_types(), json!([]));
        assert!(manager.streams().is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn column_keys_records_metadata_and_actions() {
        let (transport, _, manager) = setup();
        transport.on(
            Method::Get,
            "/jsmodel/todo.js",
            descriptor(json!([{"OnType": "todo", "Name": "archive", "Label": "Archive"}])),
        );

        let keys = manager.column_keys("todo", false).await.unwrap();
        assert_eq!(keys.column_model.len(), 1);
        assert!(manager.is_state_machine_enabled("todo"));
        assert_eq!(manager.state_machines_for_type("todo")[0].name, "review");
        assert!(manager
            .actions
            .action_model("todo", "archive")
            .is_some());
    }

    #[tokio::test]
    async fn join_tables_refresh_without_network() {
        let (transport, registry, manager) = setup();
        let fields = manager
            .refresh_world("user_account_user_account_id_has_usergroup_usergroup_id", true)
            .await
            .unwrap();
        assert!(fields.is_none());
        assert_eq!(transport.request_count(), 0);
        assert!(registry.define_log().is_empty());
    }

    #[tokio::test]
    async fn refresh_world_fetches_unknown_entry() {
        let (transport, registry, manager) = setup();
        registry.define("world", FieldMap::new());
        transport.on(Method::Get, "/jsmodel/todo.js", descriptor(json!([])));

        let err = manager.refresh_world("todo", false).await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));

        let mut entry = Resource::new();
        entry.insert("table_name".into(), json!("todo"));
        entry.insert("is_hidden".into(), json!(false));
        registry.insert("world", entry);

        let fields = manager.refresh_world("todo", false).await.unwrap().unwrap();
        assert_eq!(fields["title"], FieldSpec::Scalar("label".into()));
        assert_eq!(
            manager.world_by_name("todo").unwrap().attributes["is_hidden"],
            json!(false)
        );
        assert!(registry.definition("todo").is_some());
    }

    #[tokio::test]
    async fn refresh_worlds_rejects_empty_catalog() {
        let (_, registry, manager) = setup();
        registry.define("world", FieldMap::new());
        let err = manager.refresh_worlds(false).await.unwrap_err();
        assert!(matches!(err, ClientError::EmptyCatalog));
    }

    #[tokio::test]
    async fn load_models_named_is_all_or_nothing() {
        let (transport, _, manager) = setup();
        transport
            .on(Method::Get, "/jsmodel/todo.js", descriptor(json!([])))
            .on(Method::Get, "/jsmodel/note.js", MockReply::status(500));

        let err = manager
            .load_models_named(&["todo", "note"], false)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn init_defines_image_type_and_tolerates_meta_failure() {
        let (transport, registry, manager) = setup();
        transport.on(Method::Get, "/meta", MockReply::status(500));

        manager.init().await;

        let image = registry.definition(IMAGE_TYPE).unwrap();
        assert_eq!(image.len(), 6);
        assert_eq!(manager.column_field_types(), json!([]));
    }

    #[tokio::test]
    async fn object_tracking_endpoints() {
        let (transport, _, manager) = setup();
        transport
            .on(Method::Post, "/track/start/sm-1", MockReply::json(json!({"id": "os-1"})))
            .on(
                Method::Post,
                "/track/event/todo/os-1/approve",
                MockReply::json(json!({"state": "approved"})),
            );

        let started = manager
            .start_object_track("todo", "t-1", "sm-1")
            .await
            .unwrap();
        assert_eq!(started["id"], "os-1");
        let body = transport.requests()[0].json().unwrap();
        assert_eq!(body, json!({"typeName": "todo", "referenceId": "t-1"}));

        let state = manager
            .track_object_event("todo", "os-1", "approve")
            .await
            .unwrap();
        assert_eq!(state["state"], "approved");
    }
}
