/// Database row types and the domain values built from them.
/// These correspond to the SQLite schema defined in migrations.rs.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a support conversation a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Client,
}

impl Role {
    /// Stored / wire form: `ADMIN`, `CLIENT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Client => "CLIENT",
        }
    }

    /// Prefix used in participant identifiers: `admin`, `client`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Client => "client",
        }
    }

    pub fn counterpart(&self) -> Self {
        match self {
            Self::Admin => Self::Client,
            Self::Client => Self::Admin,
        }
    }

    /// Accepts both the stored form and the identifier prefix.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN" | "admin" => Some(Self::Admin),
            "CLIENT" | "client" => Some(Self::Client),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation record in the conversations table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub business_id: String,
    /// The client who opened the conversation
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last activity marker, bumped on every new message
    pub updated_at: DateTime<Utc>,
}

/// Media reference attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    pub id: String,
    pub url: String,
}

/// A persisted chat message, serialized as it appears on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    #[serde(rename = "senderType")]
    pub sender_role: Role,
    #[serde(rename = "userId")]
    pub sender_id: String,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub media: Vec<MediaRef>,
}

/// Input for persisting a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_role: Role,
    pub sender_id: String,
    pub content: String,
    pub media_ids: Vec<String>,
}

/// One page of a conversation's history, oldest first within the page.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub total_count: u64,
}

/// Row in conversation_reads
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub conversation_id: String,
    pub last_read_at: DateTime<Utc>,
}

/// Notification categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewMessage,
    MessagesRead,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "NEW_MESSAGE",
            Self::MessagesRead => "MESSAGES_READ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW_MESSAGE" => Some(Self::NewMessage),
            "MESSAGES_READ" => Some(Self::MessagesRead),
            _ => None,
        }
    }
}

/// Input for a durable notification record.
/// `user_id` is None for notifications addressed to every user of `target_role`
/// in the business.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Option<String>,
    pub business_id: String,
    pub target_role: Role,
    pub title: String,
    pub content: String,
    pub kind: NotificationKind,
    pub conversation_id: Option<String>,
}

/// Notification record in the notifications table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: Option<String>,
    pub business_id: String,
    pub target_role: Role,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub conversation_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Durable state of one chat room actor (room_state table).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomState {
    /// Conversation the actor is bound to; set on its first connection
    pub conversation_id: Option<String>,
    /// Pending idle-cleanup deadline
    pub cleanup_deadline: Option<DateTime<Utc>>,
}
