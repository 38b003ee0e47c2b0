//! Canonical conversation keys and their resolution.
//!
//! The server is authoritative for keys. Clients may derive a provisional key,
//! but every more authoritative value that arrives replaces it:
//!
//! ```text
//!   Guessed  <  Upload  <  History  <  Joined
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque identifier binding a document and a participant pair to one thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(Arc<str>);

impl ConversationKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Symmetric local derivation: both participants compute the same key
    /// regardless of who initiates.
    pub fn derive(document_id: &str, user_a: &str, user_b: &str) -> Self {
        let (low, high) = if user_a <= user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };
        Self(format!("{low}::{high}::{document_id}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ConversationKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// Where a key value came from, ordered by authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeySource {
    /// Derived locally or taken from a stale summary.
    Guessed,
    /// Returned by the image upload endpoint.
    Upload,
    /// Returned by the history endpoint.
    History,
    /// Returned by the channel's join acknowledgment.
    Joined,
}

/// Tracks a surface's current key and accepts only equal-or-more authoritative updates.
#[derive(Debug, Clone, Default)]
pub struct KeyResolver {
    current: Option<(ConversationKey, KeySource)>,
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a key. Returns true if the stored key changed.
    pub fn offer(&mut self, key: ConversationKey, source: KeySource) -> bool {
        if key.as_str().is_empty() {
            return false;
        }
        match &self.current {
            Some((_, current_source)) if *current_source > source => false,
            Some((current_key, _)) if *current_key == key => {
                self.current = Some((key, source));
                false
            }
            previous => {
                if let Some((previous_key, previous_source)) = previous {
                    tracing::debug!(
                        %previous_key,
                        ?previous_source,
                        conversation_key = %key,
                        ?source,
                        "conversation key replaced"
                    );
                }
                self.current = Some((key, source));
                true
            }
        }
    }

    pub fn current(&self) -> Option<&ConversationKey> {
        self.current.as_ref().map(|(key, _)| key)
    }

    pub fn source(&self) -> Option<KeySource> {
        self.current.as_ref().map(|(_, source)| *source)
    }

    pub fn matches(&self, key: &ConversationKey) -> bool {
        self.current() == Some(key)
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
