//! Server-described schema: type descriptors, worlds and field maps.

use crate::action::ActionDescriptor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Marker contained in the name of every join (association) table.
pub const JOIN_TABLE_MARKER: &str = "_has_";

/// Returns true if `table_name` names a join table.
///
/// Join tables are structural and never registered as standalone models.
pub fn is_join_table(table_name: &str) -> bool {
    table_name.contains(JOIN_TABLE_MARKER)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Metadata of one plain column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ColumnInfo {
    /// Display name.
    pub name: String,
    /// Column name in the table.
    pub column_name: String,
    /// Daptin column type (`label`, `datetime`, `file.*`, ...).
    pub column_type: String,
    /// SQL data type.
    pub data_type: String,
    /// Whether the column is indexed.
    pub is_indexed: bool,
    /// Whether the column is unique.
    pub is_unique: bool,
    /// Whether the column accepts null.
    pub is_nullable: bool,
    /// Whether the column is a foreign key.
    pub is_foreign_key: bool,
    /// Default value, as the server renders it.
    pub default_value: String,
}

/// One entry of a type's column model.
///
/// Entries the server already tags for the registry (truthy `jsonApi`, used
/// for relationships) are kept verbatim; everything else is a plain column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum ColumnEntry {
    /// A plain column.
    Column(ColumnInfo),
    /// A registry-native descriptor, passed through untouched.
    Native(Value),
}

impl ColumnEntry {
    /// Returns the column metadata of a plain column.
    pub fn column(&self) -> Option<&ColumnInfo> {
        match self {
            ColumnEntry::Column(info) => Some(info),
            ColumnEntry::Native(_) => None,
        }
    }
}

impl Serialize for ColumnEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ColumnEntry::Column(info) => info.serialize(serializer),
            ColumnEntry::Native(value) => value.serialize(serializer),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl TryFrom<Value> for ColumnEntry {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if value.get("jsonApi").is_some_and(is_truthy) {
            return Ok(ColumnEntry::Native(value));
        }
        Ok(ColumnEntry::Column(serde_json::from_value(value)?))
    }
}

/// One event of a state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineEvent {
    /// Event name.
    pub name: String,
    /// Display label.
    pub label: String,
    /// States the event may fire from.
    pub src: Vec<String>,
    /// State the event leads to.
    pub dst: String,
}

/// A state machine attached to a type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachine {
    /// Machine name.
    pub name: String,
    /// Display label.
    pub label: String,
    /// State new objects start in.
    pub initial_state: String,
    /// Transitions.
    pub events: Vec<StateMachineEvent>,
    /// Reference id of the machine descriptor.
    pub reference_id: Option<String>,
}

/// The server's description of one resource type (`/jsmodel/<type>.js`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Columns keyed by name.
    #[serde(rename = "ColumnModel", default, deserialize_with = "null_as_default")]
    pub column_model: BTreeMap<String, ColumnEntry>,
    /// Actions available on the type.
    #[serde(rename = "Actions", default, deserialize_with = "null_as_default")]
    pub actions: Vec<ActionDescriptor>,
    /// State machines attached to the type.
    #[serde(rename = "StateMachines", default, deserialize_with = "null_as_default")]
    pub state_machines: Vec<StateMachine>,
    /// Whether state machines are enabled for the type.
    #[serde(rename = "IsStateMachineEnabled", default, deserialize_with = "null_as_default")]
    pub is_state_machine_enabled: bool,
}

impl TypeDescriptor {
    /// Returns the registry field map for this type.
    pub fn json_api_model(&self) -> FieldMap {
        json_api_model(&self.column_model)
    }
}

/// The shape of one field as the resource registry sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    /// A scalar field tagged with its column type.
    Scalar(String),
    /// A registry-native descriptor (relationships).
    Native(Value),
}

/// Field name to field shape, as handed to the resource registry.
pub type FieldMap = BTreeMap<String, FieldSpec>;

/// Derives the registry field map from a column model.
///
/// Registry-native entries pass through unchanged; plain columns keep only
/// their column type.
pub fn json_api_model(column_model: &BTreeMap<String, ColumnEntry>) -> FieldMap {
    column_model
        .iter()
        .map(|(name, entry)| {
            let spec = match entry {
                ColumnEntry::Native(value) => FieldSpec::Native(value.clone()),
                ColumnEntry::Column(info) => FieldSpec::Scalar(info.column_type.clone()),
            };
            (name.clone(), spec)
        })
        .collect()
}

/// One table of the server's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    /// Table name, also the resource type name.
    pub table_name: String,
    /// Remaining catalog attributes.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl World {
    /// Creates a world with no extra attributes.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            attributes: Map::new(),
        }
    }

    /// Returns true if this world is a join table.
    pub fn is_join_table(&self) -> bool {
        is_join_table(&self.table_name)
    }
}

/// One stream of the server's stream catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream name, also the resource type name.
    pub stream_name: String,
    /// Remaining catalog attributes.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}
