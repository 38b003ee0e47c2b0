//! Channel frames. Every frame is a JSON text message `{"event": ..., "data": {...}}`.

use crate::conversation::ConversationKey;
use crate::error::ChannelError;
use crate::{DocumentId, Message, MessageBody, UserId};

use serde::{Deserialize, Serialize};

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "chat:join")]
    Join(JoinRequest),
    #[serde(rename = "chat:leave")]
    Leave(LeaveRequest),
    #[serde(rename = "chat:message")]
    Message(OutgoingMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub document_id: DocumentId,
    pub target_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub conversation_key: ConversationKey,
}

/// A message send. The server assigns the id and echoes it back to both participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_key: Option<ConversationKey>,
    pub document_id: DocumentId,
    pub target_user_id: UserId,
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "chat:connected")]
    Connected {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    #[serde(rename = "chat:joined")]
    Joined {
        #[serde(rename = "conversationKey")]
        conversation_key: ConversationKey,
    },
    #[serde(rename = "chat:left")]
    Left {
        #[serde(rename = "conversationKey")]
        conversation_key: Option<ConversationKey>,
    },
    #[serde(rename = "chat:message")]
    Message(Message),
    #[serde(rename = "chat:error")]
    Error { message: Option<String> },
}

/// What a subscriber of the channel manager receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Server(ServerEvent),
    /// The connection ended. A later `ensure()` reconnects.
    Disconnected,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedData {
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyData {
    #[serde(default)]
    conversation_key: Option<String>,
}

#[derive(Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for events this client does not handle.
pub fn decode_frame(text: &str) -> Result<Option<ServerEvent>, ChannelError> {
    let frame: RawFrame =
        serde_json::from_str(text).map_err(|error| ChannelError::Decode(error.to_string()))?;
    let decode = |error: serde_json::Error| ChannelError::Decode(format!("{}: {error}", frame.event));

    let event = match frame.event.as_str() {
        "chat:connected" => {
            let data: ConnectedData = serde_json::from_value(frame.data.clone()).map_err(decode)?;
            ServerEvent::Connected {
                user_id: data.user_id.into(),
            }
        }
        "chat:joined" => {
            let data: KeyData = serde_json::from_value(frame.data.clone()).map_err(decode)?;
            let conversation_key = data
                .conversation_key
                .filter(|key| !key.is_empty())
                .ok_or_else(|| ChannelError::Decode("chat:joined without conversationKey".into()))?;
            ServerEvent::Joined {
                conversation_key: conversation_key.into(),
            }
        }
        "chat:left" => {
            let data: KeyData = serde_json::from_value(frame.data.clone()).unwrap_or(KeyData {
                conversation_key: None,
            });
            ServerEvent::Left {
                conversation_key: data.conversation_key.map(Into::into),
            }
        }
        "chat:message" => ServerEvent::Message(serde_json::from_value(frame.data.clone()).map_err(decode)?),
        "chat:error" => {
            let data: ErrorData = serde_json::from_value(frame.data.clone()).unwrap_or(ErrorData {
                message: None,
            });
            ServerEvent::Error {
                message: data.message,
            }
        }
        other => {
            tracing::debug!(event = other, "ignoring unknown channel event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Encode an outbound event as a text frame.
pub fn encode_frame(event: &ClientEvent) -> Result<String, ChannelError> {
    Ok(serde_json::to_string(event)?)
}
