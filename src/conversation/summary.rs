//! Conversation summaries for the inbox listing.

use crate::conversation::ConversationKey;
use crate::{DocumentId, Identity, MessageKind, UserId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EMPTY_PREVIEW: &str = "Start the conversation";
const IMAGE_PREVIEW: &str = "[image]";

/// Response of the conversation summaries endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationList {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
    #[serde(default)]
    pub me: Option<Identity>,
}

/// Read-mostly aggregate of one conversation, as listed in the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_key: ConversationKey,
    #[serde(default)]
    pub document_id: Option<DocumentId>,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub partner_id: Option<UserId>,
    #[serde(default)]
    pub partner: Option<Identity>,
    #[serde(default)]
    pub document: Option<DocumentRef>,
}

/// Preview of the most recent message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Document metadata attached to a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    #[serde(default)]
    pub title: Option<String>,
}

impl ConversationSummary {
    /// The other participant: the partner snapshot's id, else `partnerId`.
    pub fn partner_user_id(&self) -> Option<&UserId> {
        self.partner
            .as_ref()
            .map(|partner| &partner.id)
            .or(self.partner_id.as_ref())
            .filter(|id| !id.is_empty())
    }

    /// One-line preview of the last message.
    pub fn preview(&self) -> &str {
        match &self.last_message {
            None => EMPTY_PREVIEW,
            Some(last) if last.kind == MessageKind::Image => IMAGE_PREVIEW,
            Some(last) => last
                .content
                .as_deref()
                .filter(|content| !content.is_empty())
                .unwrap_or(EMPTY_PREVIEW),
        }
    }

    pub fn document_title(&self) -> Option<&str> {
        self.document.as_ref().and_then(|doc| doc.title.as_deref())
    }

    pub fn partner_name(&self) -> &str {
        match (&self.partner, &self.partner_id) {
            (Some(partner), _) => partner.display_name(),
            (None, Some(id)) => &**id,
            (None, None) => "unknown",
        }
    }
}

impl ConversationList {
    pub fn find(&self, key: &ConversationKey) -> Option<&ConversationSummary> {
        self.conversations
            .iter()
            .find(|summary| &summary.conversation_key == key)
    }
}
