//! Generic JSON:API resource registry.
//!
//! Once a type is defined with a field map, the registry can list, find,
//! create and update resources of that type. The Model Synchronization
//! Engine is the only component that defines types.

use crate::api::ApiContext;
use crate::error::{ClientError, ClientResult};
use crate::transport::{HttpRequest, Journal, Method};
use async_trait::async_trait;
use daptin_protocol::FieldMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// A resource flattened to its `id` plus attributes.
pub type Resource = Map<String, Value>;

/// JSON:API media type.
pub const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Paging and equality filters for a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-indexed page number.
    pub page_number: Option<u32>,
    /// Page size.
    pub page_size: Option<u32>,
    /// `(column, value)` equality filters.
    pub filters: Vec<(String, String)>,
}

impl ListQuery {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page.
    pub fn page(mut self, number: u32, size: u32) -> Self {
        self.page_number = Some(number);
        self.page_size = Some(size);
        self
    }

    /// Adds an equality filter.
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    fn matches(&self, resource: &Resource) -> bool {
        self.filters.iter().all(|(column, value)| {
            match resource.get(column) {
                Some(Value::String(s)) => s == value,
                Some(other) => other.to_string() == *value,
                None => false,
            }
        })
    }
}

/// A generic JSON:API client keyed by defined types.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Defines (or redefines) a type with its field map.
    fn define(&self, type_name: &str, fields: FieldMap);

    /// Returns the field map a type was defined with.
    fn definition(&self, type_name: &str) -> Option<FieldMap>;

    /// Returns every defined type name, sorted.
    fn defined_types(&self) -> Vec<String>;

    /// Lists resources of a type.
    async fn find_all(&self, type_name: &str, query: &ListQuery) -> ClientResult<Vec<Resource>>;

    /// Fetches one resource.
    async fn find(&self, type_name: &str, id: &str) -> ClientResult<Resource>;

    /// Creates a resource and returns it as stored.
    async fn create(&self, type_name: &str, attributes: Resource) -> ClientResult<Resource>;

    /// Updates a resource and returns it as stored.
    async fn update(&self, type_name: &str, id: &str, attributes: Resource)
        -> ClientResult<Resource>;
}

fn undefined(type_name: &str) -> ClientError {
    ClientError::Validation(format!("resource type {type_name:?} is not defined"))
}

/// Keeps only the attributes named in the field map. An empty map keeps all.
fn restrict(fields: &FieldMap, attributes: Resource) -> Resource {
    if fields.is_empty() {
        return attributes;
    }
    attributes
        .into_iter()
        .filter(|(key, _)| fields.contains_key(key))
        .collect()
}

/// Flattens a JSON:API resource object to `id`, `type` and its attributes.
fn flatten(object: &Value) -> ClientResult<Resource> {
    let mut resource = match object.get("attributes") {
        Some(Value::Object(attributes)) => attributes.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(ClientError::Protocol(
                "resource attributes are not an object".into(),
            ))
        }
    };
    if let Some(id) = object.get("id") {
        resource.insert("id".to_string(), id.clone());
    }
    if let Some(kind) = object.get("type") {
        resource.entry("type").or_insert_with(|| kind.clone());
    }
    Ok(resource)
}

fn document_data(document: &Value) -> ClientResult<&Value> {
    document
        .get("data")
        .ok_or_else(|| ClientError::Protocol("JSON:API document has no data member".into()))
}

/// Resource registry speaking JSON:API against `<endpoint>/api/<type>`.
#[derive(Debug)]
pub struct JsonApiRegistry {
    api: ApiContext,
    definitions: RwLock<BTreeMap<String, FieldMap>>,
}

impl JsonApiRegistry {
    /// Creates a registry with no defined types.
    pub fn new(api: ApiContext) -> Self {
        Self {
            api,
            definitions: RwLock::new(BTreeMap::new()),
        }
    }

    fn fields(&self, type_name: &str) -> ClientResult<FieldMap> {
        self.definitions
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| undefined(type_name))
    }

    fn request(&self, method: Method, url: String) -> HttpRequest {
        let request = HttpRequest::new(method, url).header("Accept", JSON_API_CONTENT_TYPE);
        self.api.maybe_authorized(request)
    }
}

#[async_trait]
impl ResourceRegistry for JsonApiRegistry {
    fn define(&self, type_name: &str, fields: FieldMap) {
        debug!(type_name, fields = fields.len(), "defining resource type");
        self.definitions
            .write()
            .insert(type_name.to_string(), fields);
    }

    fn definition(&self, type_name: &str) -> Option<FieldMap> {
        self.definitions.read().get(type_name).cloned()
    }

    fn defined_types(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    async fn find_all(&self, type_name: &str, query: &ListQuery) -> ClientResult<Vec<Resource>> {
        self.fields(type_name)?;

        let number = query.page_number.map(|n| n.to_string());
        let size = query.page_size.map(|n| n.to_string());
        let filter = (!query.filters.is_empty()).then(|| {
            Value::Array(
                query
                    .filters
                    .iter()
                    .map(|(column, value)| {
                        json!({"column": column, "operator": "is", "value": value})
                    })
                    .collect(),
            )
            .to_string()
        });

        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(number) = number.as_deref() {
            params.push(("page[number]", number));
        }
        if let Some(size) = size.as_deref() {
            params.push(("page[size]", size));
        }
        if let Some(filter) = filter.as_deref() {
            params.push(("query", filter));
        }

        let url = self.api.url(&["api", type_name], &params)?;
        let document: Value = self.api.send_json(self.request(Method::Get, url)).await?;
        match document_data(&document)? {
            Value::Array(items) => items.iter().map(flatten).collect(),
            Value::Null => Ok(Vec::new()),
            _ => Err(ClientError::Protocol(format!(
                "list of {type_name} did not return an array"
            ))),
        }
    }

    async fn find(&self, type_name: &str, id: &str) -> ClientResult<Resource> {
        self.fields(type_name)?;
        let url = self.api.url(&["api", type_name, id], &[])?;
        let document: Value = self.api.send_json(self.request(Method::Get, url)).await?;
        match document_data(&document)? {
            Value::Null => Err(ClientError::NotFound(format!("{type_name}/{id}"))),
            data => flatten(data),
        }
    }

    async fn create(&self, type_name: &str, attributes: Resource) -> ClientResult<Resource> {
        let fields = self.fields(type_name)?;
        let url = self.api.url(&["api", type_name], &[])?;
        let body = json!({
            "data": {"type": type_name, "attributes": restrict(&fields, attributes)}
        });
        let request = self
            .request(Method::Post, url)
            .header("Content-Type", JSON_API_CONTENT_TYPE)
            .json(body);
        let document: Value = self.api.send_json(request).await?;
        flatten(document_data(&document)?)
    }

    async fn update(
        &self,
        type_name: &str,
        id: &str,
        attributes: Resource,
    ) -> ClientResult<Resource> {
        let fields = self.fields(type_name)?;
        let url = self.api.url(&["api", type_name, id], &[])?;
        let body = json!({
            "data": {"type": type_name, "id": id, "attributes": restrict(&fields, attributes)}
        });
        let request = self
            .request(Method::Patch, url)
            .header("Content-Type", JSON_API_CONTENT_TYPE)
            .json(body);
        let document: Value = self.api.send_json(request).await?;
        flatten(document_data(&document)?)
    }
}

/// An in-memory resource registry for testing.
///
/// Records `define <type>` into an optional [`Journal`], so tests can check
/// registration order against transport traffic.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    definitions: RwLock<BTreeMap<String, FieldMap>>,
    resources: RwLock<BTreeMap<String, Vec<Resource>>>,
    defines: RwLock<Vec<String>>,
    journal: Option<Journal>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry recording definitions into `journal`.
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// Seeds a resource without going through `create`.
    pub fn insert(&self, type_name: &str, resource: Resource) {
        self.resources
            .write()
            .entry(type_name.to_string())
            .or_default()
            .push(resource);
    }

    /// Returns every `define` call, in order.
    pub fn define_log(&self) -> Vec<String> {
        self.defines.read().clone()
    }

    fn ensure_defined(&self, type_name: &str) -> ClientResult<FieldMap> {
        self.definitions
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| undefined(type_name))
    }

    fn position(&self, type_name: &str, id: &str) -> Option<usize> {
        self.resources.read().get(type_name).and_then(|items| {
            items
                .iter()
                .position(|r| r.get("id").and_then(Value::as_str) == Some(id))
        })
    }
}

#[async_trait]
impl ResourceRegistry for MemoryRegistry {
    fn define(&self, type_name: &str, fields: FieldMap) {
        self.definitions
            .write()
            .insert(type_name.to_string(), fields);
        self.defines.write().push(type_name.to_string());
        if let Some(journal) = &self.journal {
            journal.record(format!("define {type_name}"));
        }
    }

    fn definition(&self, type_name: &str) -> Option<FieldMap> {
        self.definitions.read().get(type_name).cloned()
    }

    fn defined_types(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    async fn find_all(&self, type_name: &str, query: &ListQuery) -> ClientResult<Vec<Resource>> {
        self.ensure_defined(type_name)?;
        let resources = self.resources.read();
        let matching = resources
            .get(type_name)
            .into_iter()
            .flatten()
            .filter(|r| query.matches(r));
        let items: Vec<Resource> = match (query.page_number, query.page_size) {
            (Some(number), Some(size)) => matching
                .skip((number.max(1) as usize - 1) * size as usize)
                .take(size as usize)
                .cloned()
                .collect(),
            _ => matching.cloned().collect(),
        };
        Ok(items)
    }

    async fn find(&self, type_name: &str, id: &str) -> ClientResult<Resource> {
        self.ensure_defined(type_name)?;
        let index = self
            .position(type_name, id)
            .ok_or_else(|| ClientError::NotFound(format!("{type_name}/{id}")))?;
        self.resources
            .read()
            .get(type_name)
            .and_then(|items| items.get(index).cloned())
            .ok_or_else(|| ClientError::NotFound(format!("{type_name}/{id}")))
    }

    async fn create(&self, type_name: &str, attributes: Resource) -> ClientResult<Resource> {
        let fields = self.ensure_defined(type_name)?;
        let mut resource = restrict(&fields, attributes);
        let mut resources = self.resources.write();
        let items = resources.entry(type_name.to_string()).or_default();
        resource
            .entry("id")
            .or_insert_with(|| Value::String(format!("{type_name}-{}", items.len() + 1)));
        items.push(resource.clone());
        Ok(resource)
    }

    async fn update(
        &self,
        type_name: &str,
        id: &str,
        attributes: Resource,
    ) -> ClientResult<Resource> {
        let fields = self.ensure_defined(type_name)?;
        let index = self
            .position(type_name, id)
            .ok_or_else(|| ClientError::NotFound(format!("{type_name}/{id}")))?;
        let mut resources = self.resources.write();
        let resource = resources
            .get_mut(type_name)
            .and_then(|items| items.get_mut(index))
            .ok_or_else(|| ClientError::NotFound(format!("{type_name}/{id}")))?;
        resource.extend(restrict(&fields, attributes));
        Ok(resource.clone())
    }
}
