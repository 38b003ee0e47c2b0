//! Loading a conversation's past messages when a surface opens.

use crate::api::ChatApiDyn;
use crate::conversation::ConversationKey;
use crate::error::{ChatError, Error, Result};
use crate::session::SessionStore;
use crate::{Identity, Message};

use std::sync::Arc;

/// A loaded history snapshot, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    /// Canonical key returned by the server, when it sent one.
    pub key: Option<ConversationKey>,
    pub messages: Vec<Message>,
    pub me: Option<Identity>,
    pub partner: Option<Identity>,
}

/// Fetches history through the chat API with the configured limit.
#[derive(Clone)]
pub struct HistoryFetcher {
    api: Arc<dyn ChatApiDyn>,
    session: Arc<SessionStore>,
    limit: u32,
}

impl HistoryFetcher {
    pub fn new(api: Arc<dyn ChatApiDyn>, session: Arc<SessionStore>, limit: u32) -> Self {
        Self {
            api,
            session,
            limit,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Load the conversation between the current user and `partner_id` about a document.
    ///
    /// `Error::NotAuthenticated` passes through untouched. Every other failure becomes
    /// `ChatError::HistoryLoad` carrying the message a surface shows inline.
    pub async fn fetch(&self, document_id: &str, partner_id: &str) -> Result<ConversationHistory> {
        self.session.require_token()?;

        let response = match self.api.history(document_id, partner_id, self.limit).await {
            Ok(response) => response,
            Err(Error::NotAuthenticated) => return Err(Error::NotAuthenticated),
            Err(error) => {
                tracing::warn!(document_id, partner_id, %error, "failed to load history");
                return Err(ChatError::HistoryLoad(error.user_message()).into());
            }
        };

        Ok(ConversationHistory {
            key: response
                .conversation_key
                .filter(|key| !key.as_str().is_empty()),
            messages: response.messages,
            me: response.me,
            partner: response.partner,
        })
    }
}

impl std::fmt::Debug for HistoryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryFetcher")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
