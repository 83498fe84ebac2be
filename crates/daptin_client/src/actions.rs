//! Action Dispatcher.
//!
//! Keeps the `OnType -> Name -> ActionDescriptor` map filled by model loads,
//! invokes actions on the server and hands the typed response instructions
//! to an [`InstructionHandler`].

use crate::api::ApiContext;
use crate::error::ClientResult;
use crate::transport::HttpRequest;
use daptin_protocol::{ActionDescriptor, ActionResponse, ClientInstruction};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Actions of one type, keyed by action name.
pub type ActionSet = BTreeMap<String, ActionDescriptor>;

/// Consumes the instructions an action response carries.
pub trait InstructionHandler: Send + Sync {
    /// Handles one instruction. Called in response order.
    fn handle(&self, instruction: &ClientInstruction);
}

/// Handler that only logs each instruction.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInstructionHandler;

impl InstructionHandler for LoggingInstructionHandler {
    fn handle(&self, instruction: &ClientInstruction) {
        match instruction {
            ClientInstruction::Notify(n) => {
                info!(kind = %n.kind, title = %n.title, message = %n.message, "notification")
            }
            ClientInstruction::StoreSet { key, .. } => info!(key = %key, "store value"),
            ClientInstruction::FileDownload(file) => {
                info!(name = %file.name, content_type = %file.content_type, "file download")
            }
            ClientInstruction::Redirect { location, .. } => {
                info!(location = %location, "redirect")
            }
            ClientInstruction::CookieSet { key, .. } => info!(key = %key, "cookie set"),
            ClientInstruction::Other { response_type, .. } => {
                warn!(response_type = %response_type, "unhandled action response")
            }
        }
    }
}

/// Dispatches named actions and tracks the action map.
pub struct ActionManager {
    api: ApiContext,
    actions: RwLock<BTreeMap<String, ActionSet>>,
    handler: Arc<dyn InstructionHandler>,
}

impl ActionManager {
    /// Creates a dispatcher that logs instructions.
    pub fn new(api: ApiContext) -> Self {
        Self::with_handler(api, Arc::new(LoggingInstructionHandler))
    }

    /// Creates a dispatcher with a custom instruction handler.
    pub fn with_handler(api: ApiContext, handler: Arc<dyn InstructionHandler>) -> Self {
        Self {
            api,
            actions: RwLock::new(BTreeMap::new()),
            handler,
        }
    }

    /// Registers actions keyed by `(OnType, Name)`; later entries overwrite.
    pub fn add_all_actions(&self, actions: &[ActionDescriptor]) {
        let mut map = self.actions.write();
        for action in actions {
            map.entry(action.on_type.clone())
                .or_default()
                .insert(action.name.clone(), action.clone());
        }
        debug!(count = actions.len(), "registered actions");
    }

    /// Replaces every action of `type_name`.
    pub fn set_actions(&self, type_name: &str, actions: ActionSet) {
        self.actions.write().insert(type_name.to_string(), actions);
    }

    /// Returns the actions of a type.
    pub fn actions(&self, type_name: &str) -> Option<ActionSet> {
        self.actions.read().get(type_name).cloned()
    }

    /// Returns one action descriptor.
    pub fn action_model(&self, type_name: &str, action_name: &str) -> Option<ActionDescriptor> {
        self.actions
            .read()
            .get(type_name)
            .and_then(|set| set.get(action_name))
            .cloned()
    }

    /// Returns every type that has registered actions.
    pub fn action_types(&self) -> Vec<String> {
        self.actions.read().keys().cloned().collect()
    }

    /// Lists the actions available without authentication.
    pub async fn guest_actions(&self) -> ClientResult<Value> {
        let url = self.api.url(&["actions"], &[])?;
        self.api.send_json(HttpRequest::get(url)).await
    }

    /// Invokes `action_name` on `type_name` and handles its response instructions.
    pub async fn do_action(
        &self,
        type_name: &str,
        action_name: &str,
        attributes: Value,
    ) -> ClientResult<Vec<ClientInstruction>> {
        let url = self.api.url(&["action", type_name, action_name], &[])?;
        let request = self
            .api
            .authorized(HttpRequest::post(url))?
            .json(json!({ "attributes": attributes }));
        let responses: Vec<ActionResponse> = self.api.send_json(request).await?;

        debug!(type_name, action_name, responses = responses.len(), "action completed");
        let instructions: Vec<ClientInstruction> =
            responses.into_iter().map(ClientInstruction::from).collect();
        for instruction in &instructions {
            self.handler.handle(instruction);
        }
        Ok(instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::token::StaticToken;
    use crate::transport::{MockReply, MockTransport, Method};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ClientInstruction>>);

    impl InstructionHandler for Recorder {
        fn handle(&self, instruction: &ClientInstruction) {
            self.0.lock().push(instruction.clone());
        }
    }

    fn manager(transport: Arc<MockTransport>, token: StaticToken) -> ActionManager {
        ActionManager::new(ApiContext::new(
            ClientConfig::new("http://localhost:6336"),
            transport,
            Arc::new(token),
        ))
    }

    #[test]
    fn add_all_actions_last_write_wins() {
        let manager = manager(Arc::new(MockTransport::new()), StaticToken::none());
        let mut first = ActionDescriptor::new("user_account", "signin");
        first.label = "Sign in".into();
        let mut second = first.clone();
        second.label = "Log in".into();

        manager.add_all_actions(&[first, ActionDescriptor::new("world", "export")]);
        manager.add_all_actions(&[second]);

        assert_eq!(
            manager.action_model("user_account", "signin").unwrap().label,
            "Log in"
        );
        assert_eq!(manager.actions("user_account").unwrap().len(), 1);
        assert_eq!(manager.action_types(), vec!["user_account", "world"]);
        assert!(manager.action_model("user_account", "missing").is_none());
    }

    #[tokio::test]
    async fn do_action_dispatches_instructions_in_order() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Post,
            "/action/user_account/signin",
            MockReply::json(json!([
                {"ResponseType": "client.store.set", "Attributes": {"key": "token", "value": "jwt"}},
                {"ResponseType": "client.notify", "Attributes": {"type": "success", "title": "ok", "message": "Logged in"}},
                {"ResponseType": "client.redirect", "Attributes": {"location": "/", "window": "self", "delay": 0}}
            ])),
        );
        let recorder = Arc::new(Recorder::default());
        let manager = ActionManager::with_handler(
            ApiContext::new(
                ClientConfig::new("http://localhost:6336"),
                transport.clone(),
                Arc::new(StaticToken::new("guest")),
            ),
            recorder.clone(),
        );

        let instructions = manager
            .do_action("user_account", "signin", json!({"email": "a@b.c"}))
            .await
            .unwrap();

        assert_eq!(instructions.len(), 3);
        assert!(matches!(instructions[0], ClientInstruction::StoreSet { .. }));
        assert_eq!(*recorder.0.lock(), instructions);

        let request = &transport.requests()[0];
        assert_eq!(request.header("Authorization"), Some("Bearer guest"));
        assert_eq!(
            request.json().unwrap(),
            json!({"attributes": {"email": "a@b.c"}})
        );
    }

    #[tokio::test]
    async fn do_action_without_token_sends_nothing() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(transport.clone(), StaticToken::none());

        let err = manager
            .do_action("world", "export", json!({}))
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn guest_actions_are_unauthenticated() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, "/actions", MockReply::json(json!({"signin": {}})));
        let manager = manager(transport.clone(), StaticToken::new("jwt"));

        let actions = manager.guest_actions().await.unwrap();
        assert!(actions.get("signin").is_some());
        assert_eq!(transport.requests()[0].header("Authorization"), None);
    }
}
