//! Action descriptors and action response instructions.

use crate::error::ProtocolResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An action the server exposes on a type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ActionDescriptor {
    /// Type the action runs on.
    pub on_type: String,
    /// Action name, unique per type.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Whether the action can run without a target instance.
    pub instance_optional: bool,
    /// Input fields the action accepts.
    pub in_fields: Vec<Value>,
    /// Remaining descriptor members.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionDescriptor {
    /// Creates a descriptor with only its key fields set.
    pub fn new(on_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            on_type: on_type.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One entry of an action's response list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Instruction kind (`client.notify`, `client.store.set`, ...).
    #[serde(rename = "ResponseType")]
    pub response_type: String,
    /// Instruction payload.
    #[serde(rename = "Attributes", default)]
    pub attributes: Value,
}

impl ActionResponse {
    /// Interprets the response as a typed instruction.
    pub fn instruction(&self) -> ClientInstruction {
        ClientInstruction::from(self.clone())
    }
}

/// A notification shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    /// Severity (`success`, `error`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Title line.
    pub title: String,
    /// Body text.
    pub message: String,
}

/// A file handed back for download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDownload {
    /// Suggested file name.
    pub name: String,
    /// MIME type of the content.
    #[serde(rename = "contentType")]
    pub content_type: String,
    /// Base64 encoded content.
    pub content: String,
}

impl FileDownload {
    /// Decodes the base64 content.
    pub fn decode_content(&self) -> ProtocolResult<Vec<u8>> {
        Ok(STANDARD.decode(self.content.trim())?)
    }
}

/// A typed instruction from an action response.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientInstruction {
    /// `client.notify`.
    Notify(Notification),
    /// `client.store.set`: persist a key/value pair.
    StoreSet {
        /// Key to set.
        key: String,
        /// Value to store.
        value: String,
    },
    /// `client.file.download`.
    FileDownload(FileDownload),
    /// `client.redirect`.
    Redirect {
        /// Target location.
        location: String,
        /// Target window, if any.
        window: Option<String>,
        /// Delay before redirecting, in milliseconds.
        delay: Option<u64>,
    },
    /// `client.cookie.set`.
    CookieSet {
        /// Cookie name.
        key: String,
        /// Cookie value.
        value: String,
    },
    /// Any response type this client does not interpret.
    Other {
        /// Raw response type.
        response_type: String,
        /// Raw payload.
        attributes: Value,
    },
}

fn text(attributes: &Value, key: &str) -> String {
    match attributes.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl From<ActionResponse> for ClientInstruction {
    fn from(response: ActionResponse) -> Self {
        let attrs = &response.attributes;
        match response.response_type.as_str() {
            "client.notify" => match serde_json::from_value(attrs.clone()) {
                Ok(notification) => ClientInstruction::Notify(notification),
                Err(_) => ClientInstruction::Notify(Notification {
                    message: text(attrs, "message"),
                    ..Notification::default()
                }),
            },
            "client.store.set" => ClientInstruction::StoreSet {
                key: text(attrs, "key"),
                value: text(attrs, "value"),
            },
            "client.file.download" => ClientInstruction::FileDownload(FileDownload {
                name: text(attrs, "name"),
                content_type: text(attrs, "contentType"),
                content: text(attrs, "content"),
            }),
            "client.redirect" => ClientInstruction::Redirect {
                location: text(attrs, "location"),
                window: attrs
                    .get("window")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                delay: attrs.get("delay").and_then(Value::as_u64),
            },
            "client.cookie.set" => ClientInstruction::CookieSet {
                key: text(attrs, "key"),
                value: text(attrs, "value"),
            },
            _ => ClientInstruction::Other {
                response_type: response.response_type.clone(),
                attributes: response.attributes.clone(),
            },
        }
    }
}
