//! Bearer token sources.

use crate::session_store::SessionStore;
use std::sync::Arc;

/// Key under which the session token is stored.
pub const TOKEN_KEY: &str = "token";

/// Supplies the bearer token for authenticated requests.
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, if any.
    fn token(&self) -> Option<String>;
}

/// A fixed token, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Creates a provider that always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Creates a provider with no token.
    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone().filter(|t| !t.is_empty())
    }
}

/// Reads the token from a session store on every call.
///
/// Pairs with `client.store.set` action instructions writing the `token` key.
#[derive(Clone)]
pub struct StoredToken {
    store: Arc<dyn SessionStore>,
    key: String,
}

impl StoredToken {
    /// Reads the [`TOKEN_KEY`] entry of `store`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_key(store, TOKEN_KEY)
    }

    /// Reads the `key` entry of `store`.
    pub fn with_key(store: Arc<dyn SessionStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

impl TokenProvider for StoredToken {
    fn token(&self) -> Option<String> {
        match self.store.get(&self.key) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read stored token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::MemorySessionStore;

    #[test]
    fn static_token() {
        assert_eq!(StaticToken::new("jwt").token().as_deref(), Some("jwt"));
        assert_eq!(StaticToken::none().token(), None);
        assert_eq!(StaticToken::new("").token(), None);
    }

    #[test]
    fn stored_token_follows_store() {
        let store = Arc::new(MemorySessionStore::new());
        let provider = StoredToken::new(store.clone());
        assert_eq!(provider.token(), None);

        store.set(TOKEN_KEY, "jwt").unwrap();
        assert_eq!(provider.token().as_deref(), Some("jwt"));

        store.remove(TOKEN_KEY).unwrap();
        assert_eq!(provider.token(), None);
    }
}
