//! Session token storage shared by the REST client and the channel.

use crate::error::{Error, Result};

use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Holds the current session token. Cleared when the server rejects it.
#[derive(Debug, Default)]
pub struct SessionStore {
    token: ArcSwapOption<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set_token(token);
        store
    }

    /// Current token. Blank tokens count as absent.
    pub fn token(&self) -> Option<Arc<String>> {
        self.token.load_full()
    }

    /// Current token, or `Error::NotAuthenticated` before any network work happens.
    pub fn require_token(&self) -> Result<Arc<String>> {
        self.token().ok_or(Error::NotAuthenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.load().is_some()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        if token.trim().is_empty() {
            self.clear();
            return;
        }
        self.token.store(Some(Arc::new(token)));
    }

    pub fn clear(&self) {
        if self.token.swap(None).is_some() {
            tracing::info!("session token cleared");
        }
    }
}
