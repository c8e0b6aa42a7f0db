//! JSON text protocol spoken on the chat and notification sockets.
//!
//! Inbound frames look like `{type, content?, mediaIds?, page?, limit?}`.
//! `MessageDispatcher` turns them into a typed `ClientEvent` or a
//! `ProtocolError` whose display string is the exact wire error.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{ChatMessage, Role};

/// Error strings for failures raised after decoding.
pub const ERR_CONVERSATION_NOT_FOUND: &str = "Conversation not found";
pub const ERR_LOAD_HISTORY: &str = "Failed to load history";
pub const ERR_MARK_READ: &str = "Failed to mark messages as read";
pub const ERR_INTERNAL: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    InvalidFormat,
    #[error("Missing message type")]
    MissingType,
    #[error("Unknown message type")]
    UnknownType,
    #[error("Missing message content or media")]
    MissingContent,
    #[error("Message too long")]
    MessageTooLong,
    #[error("Missing conversation ID")]
    MissingConversationId,
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// A validated inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SendMessage {
        conversation_id: String,
        content: String,
        media_ids: Vec<String>,
    },
    Typing,
    RequestHistory {
        page: u32,
        limit: u32,
    },
    MarkAsRead {
        conversation_id: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    content: Option<String>,
    media_ids: Option<Vec<String>>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    pub max_content_length: usize,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            default_page_limit: 10,
            max_page_limit: 100,
            max_content_length: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDispatcher {
    limits: DispatchLimits,
}

impl MessageDispatcher {
    pub fn new(limits: DispatchLimits) -> Self {
        Self { limits }
    }

    /// Decode one text frame. Events always act on `bound_conversation`, the
    /// conversation the receiving room serves; a conversation named in the
    /// frame is ignored.
    pub fn decode(
        &self,
        text: &str,
        bound_conversation: Option<&str>,
    ) -> Result<ClientEvent, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidFormat)?;
        let object = value.as_object().ok_or(ProtocolError::InvalidFormat)?;

        let kind = match object.get("type") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(ProtocolError::MissingType),
        };

        match kind.as_str() {
            "SEND_MESSAGE" => {
                let raw = self.fields(value)?;
                let content = raw.content.unwrap_or_default();
                let media_ids = raw.media_ids.unwrap_or_default();
                if content.is_empty() && media_ids.is_empty() {
                    return Err(ProtocolError::MissingContent);
                }
                if content.chars().count() > self.limits.max_content_length {
                    return Err(ProtocolError::MessageTooLong);
                }
                let conversation_id = bound_conversation
                    .map(str::to_string)
                    .ok_or(ProtocolError::MissingConversationId)?;
                Ok(ClientEvent::SendMessage {
                    conversation_id,
                    content,
                    media_ids,
                })
            }
            "TYPING" => Ok(ClientEvent::Typing),
            "REQUEST_HISTORY" => {
                let raw = self.fields(value)?;
                let page = raw.page.filter(|p| *p > 0).unwrap_or(1);
                let limit = raw
                    .limit
                    .filter(|l| *l > 0)
                    .unwrap_or(self.limits.default_page_limit)
                    .min(self.limits.max_page_limit);
                Ok(ClientEvent::RequestHistory { page, limit })
            }
            "MARK_AS_READ" => {
                let conversation_id = bound_conversation
                    .map(str::to_string)
                    .ok_or(ProtocolError::MissingConversationId)?;
                Ok(ClientEvent::MarkAsRead { conversation_id })
            }
            _ => Err(ProtocolError::UnknownType),
        }
    }

    fn fields(&self, value: serde_json::Value) -> Result<RawFrame, ProtocolError> {
        serde_json::from_value(value).map_err(|_| ProtocolError::InvalidFormat)
    }
}

/// Outbound chat-room frames, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage { message: ChatMessage },

    #[serde(rename = "HISTORY", rename_all = "camelCase")]
    History {
        messages: Vec<ChatMessage>,
        page: u32,
        limit: u32,
        total_count: u64,
        has_more: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        unread_count: Option<u64>,
    },

    #[serde(rename = "TYPING", rename_all = "camelCase")]
    Typing {
        name: String,
        user_id: String,
        sender_type: Role,
        conversation_id: String,
    },

    #[serde(rename = "MESSAGES_READ", rename_all = "camelCase")]
    MessagesRead {
        read_by: String,
        user_id: String,
        sender_type: Role,
        conversation_id: String,
        last_read_at: DateTime<Utc>,
    },

    #[serde(rename = "error")]
    Error { error: String },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_message(&self) -> Message {
        encode_frame(self)
    }
}

/// Notification-hub frame: `{type, payload}`.
#[derive(Debug, Clone, Serialize)]
pub struct HubFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl HubFrame {
    pub fn to_message(&self) -> Message {
        encode_frame(self)
    }
}

fn encode_frame<T: Serialize>(frame: &T) -> Message {
    // Frame types contain only strings, numbers and timestamps
    let text = serde_json::to_string(frame).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode outbound frame");
        format!(r#"{{"type":"error","error":"{ERR_INTERNAL}"}}"#)
    });
    Message::Text(text.into())
}
