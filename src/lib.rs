//! Docchat: the live, document-scoped conversation engine behind a document-sharing client.
//!
//! A document's uploader and a viewer exchange text and image messages over one
//! authenticated channel per session, while every chat surface keeps its own
//! deduplicated view of the conversation.

pub mod api;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod error;
pub mod outbound;
pub mod session;
pub mod surface;
#[cfg(test)]
pub(crate) mod testing;

pub use conversation::ConversationKey;
pub use error::{Error, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// User identifier type.
pub type UserId = Arc<str>;

/// Document identifier type.
pub type DocumentId = Arc<str>;

/// Server-assigned message identifier. Opaque; the only identity used for dedup.
pub type MessageId = Arc<str>;

/// Identity snapshot of a participant as known server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            username: None,
            full_name: None,
            avatar_url: None,
        }
    }

    /// Best human-readable name: full name, then username, then the raw id.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Message kind as it appears in the `type` field on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Image => write!(f, "image"),
        }
    }
}

/// Message payload. Serialized flat as `type` plus `content` or `imageUrl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        content: String,
    },
    Image {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
}

impl MessageBody {
    pub fn text(content: impl Into<String>) -> Self {
        MessageBody::Text {
            content: content.into(),
        }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        MessageBody::Image {
            image_url: image_url.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::Image { .. } => MessageKind::Image,
        }
    }
}

impl std::fmt::Display for MessageBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageBody::Text { content } => write!(f, "{}", content),
            MessageBody::Image { image_url } => write!(f, "[image] {}", image_url),
        }
    }
}

/// A chat message. Never mutated once received, only appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub id: MessageId,
    pub conversation_key: ConversationKey,
    pub document_id: Option<DocumentId>,
    pub sender_id: UserId,
    /// Sender snapshot attached by the server on live delivery. Absent in history.
    pub sender: Option<Identity>,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        &*self.sender_id == user_id
    }
}

/// Flat wire shape shared by history entries and `chat:message` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    conversation_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender: Option<Identity>,
    #[serde(rename = "type", default)]
    kind: MessageKind,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> std::result::Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err("message without id".into());
        }
        let body = match wire.kind {
            MessageKind::Text => MessageBody::Text {
                content: wire
                    .content
                    .ok_or_else(|| format!("text message {} has no content", wire.id))?,
            },
            MessageKind::Image => MessageBody::Image {
                image_url: wire
                    .image_url
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| format!("image message {} has no imageUrl", wire.id))?,
            },
        };

        Ok(Self {
            id: wire.id.into(),
            conversation_key: ConversationKey::new(wire.conversation_key),
            document_id: wire.document_id.map(Into::into),
            sender_id: wire.sender_id.into(),
            sender: wire.sender,
            body,
            created_at: wire.created_at,
        })
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        let kind = message.kind();
        let (content, image_url) = match message.body {
            MessageBody::Text { content } => (Some(content), None),
            MessageBody::Image { image_url } => (None, Some(image_url)),
        };
        Self {
            id: message.id.to_string(),
            conversation_key: message.conversation_key.to_string(),
            document_id: message.document_id.map(|id| id.to_string()),
            sender_id: message.sender_id.to_string(),
            sender: message.sender,
            kind,
            content,
            image_url,
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_live_text_message() {
        let json = serde_json::json!({
            "id": "m1",
            "conversationKey": "a::b::d1",
            "documentId": "d1",
            "senderId": "a",
            "sender": {"id": "a", "username": "alice", "fullName": "Alice", "avatarUrl": null},
            "type": "text",
            "content": "Hello",
            "imageUrl": null,
            "createdAt": "2025-03-01T10:00:00.123456Z"
        });

        let message: Message = serde_json::from_value(json).expect("should decode");
        assert_eq!(&*message.id, "m1");
        assert_eq!(message.conversation_key.as_str(), "a::b::d1");
        assert_eq!(message.body, MessageBody::text("Hello"));
        assert_eq!(
            message.sender.as_ref().map(Identity::display_name),
            Some("Alice")
        );
    }

    #[test]
    fn history_entry_without_type_defaults_to_text() {
        let json = serde_json::json!({
            "id": "m2",
            "conversationKey": "k",
            "senderId": "b",
            "targetUserId": "a",
            "content": "hi",
            "createdAt": "2025-03-01T10:00:00Z"
        });

        let message: Message = serde_json::from_value(json).expect("should decode");
        assert_eq!(message.kind(), MessageKind::Text);
        assert!(message.document_id.is_none());
    }

    #[test]
    fn rejects_image_message_without_url() {
        let json = serde_json::json!({
            "id": "m3",
            "conversationKey": "k",
            "senderId": "b",
            "type": "image",
            "content": null,
            "imageUrl": null,
            "createdAt": "2025-03-01T10:00:00Z"
        });

        let error = serde_json::from_value::<Message>(json).expect_err("must be rejected");
        assert!(error.to_string().contains("has no imageUrl"));
    }

    #[test]
    fn image_body_serializes_flat() {
        let value = serde_json::to_value(MessageBody::image("https://cdn/x.png"))
            .expect("should encode");
        assert_eq!(
            value,
            serde_json::json!({"type": "image", "imageUrl": "https://cdn/x.png"})
        );
    }

    #[test]
    fn display_name_falls_back_to_username_then_id() {
        let mut identity = Identity::new("u1");
        assert_eq!(identity.display_name(), "u1");
        identity.username = Some("bob".into());
        assert_eq!(identity.display_name(), "bob");
        identity.full_name = Some("  ".into());
        assert_eq!(identity.display_name(), "bob");
    }
}
