//! Persistence collaborator for the chat rooms and REST routes.
//!
//! `ChatStore` is the contract the actors consume; `SqliteChatStore` is the
//! embedded implementation. rusqlite is synchronous, so every call runs on
//! `spawn_blocking` against the shared connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::models::{
    ChatMessage, Conversation, MediaRef, MessagePage, NewMessage, NewNotification, Notification,
    NotificationKind, ReadReceipt, Role, RoomState,
};
use crate::db::{format_timestamp, parse_timestamp, DbPool};
use crate::ws::ParticipantId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("blocking task failed: {0}")]
    Task(String),
    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Who is asking for notifications: rows addressed to the user directly,
/// plus role-wide rows of their business.
#[derive(Debug, Clone)]
pub struct NotificationAudience {
    pub user_id: String,
    pub business_id: Option<String>,
    pub role: Role,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Return the user's open conversation with a business, creating it if needed.
    async fn find_or_create_conversation(
        &self,
        business_id: &str,
        user_id: &str,
    ) -> Result<Conversation, StoreError>;

    /// Store a message and link any known media ids to it.
    async fn persist_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError>;

    /// Bump the conversation's last-activity marker.
    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError>;

    /// Page 1 is the most recent `limit` messages. None when the conversation
    /// does not exist.
    async fn fetch_message_page(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Option<MessagePage>, StoreError>;

    async fn upsert_read_receipt(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<ReadReceipt, StoreError>;

    /// Messages stored after the reader's last receipt (all of them when
    /// there is none), excluding the reader's own.
    async fn unread_count(
        &self,
        conversation_id: &str,
        reader: &ParticipantId,
    ) -> Result<u64, StoreError>;

    /// Raw name lookup; callers go through the display-name cache.
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    async fn create_notification_record(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError>;

    async fn list_notifications(
        &self,
        audience: &NotificationAudience,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn mark_notifications_read(
        &self,
        audience: &NotificationAudience,
        ids: &[String],
    ) -> Result<usize, StoreError>;

    async fn delete_notification(
        &self,
        audience: &NotificationAudience,
        id: &str,
    ) -> Result<bool, StoreError>;

    async fn load_room_state(&self, room_key: &str) -> Result<RoomState, StoreError>;

    async fn save_room_state(&self, room_key: &str, state: &RoomState) -> Result<(), StoreError>;

    async fn clear_room_state(&self, room_key: &str) -> Result<(), StoreError>;

    /// Rooms whose persisted cleanup deadline is at or before `now`.
    async fn due_room_states(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;
}

/// `ChatStore` backed by the server's SQLite database.
#[derive(Clone)]
pub struct SqliteChatStore {
    db: DbPool,
}

impl SqliteChatStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn role_from_column(raw: String) -> rusqlite::Result<Role> {
    Role::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown role {raw}").into(),
        )
    })
}

fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        business_id: row.get(1)?,
        user_id: row.get(2)?,
        created_at: parse_timestamp(&row.get::<_, String>(3)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(4)?)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        content: row.get(1)?,
        sender_role: role_from_column(row.get(2)?)?,
        sender_id: row.get(3)?,
        conversation_id: row.get(4)?,
        created_at: parse_timestamp(&row.get::<_, String>(5)?)?,
        media: Vec::new(),
    })
}

fn notification_from_row(row: &Row) -> rusqlite::Result<Notification> {
    let kind: String = row.get(6)?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        business_id: row.get(2)?,
        target_role: role_from_column(row.get(3)?)?,
        title: row.get(4)?,
        content: row.get(5)?,
        kind: NotificationKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown notification type {kind}").into(),
            )
        })?,
        conversation_id: row.get(7)?,
        is_read: row.get::<_, i64>(8)? != 0,
        created_at: parse_timestamp(&row.get::<_, String>(9)?)?,
    })
}

fn load_media(conn: &Connection, message_id: &str) -> rusqlite::Result<Vec<MediaRef>> {
    let mut stmt = conn.prepare_cached(
        "SELECT m.id, m.url FROM message_media mm
         JOIN media m ON m.id = mm.media_id
         WHERE mm.message_id = ?1
         ORDER BY m.uploaded_at ASC",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        Ok(MediaRef {
            id: row.get(0)?,
            url: row.get(1)?,
        })
    })?;
    rows.collect()
}

fn conversation_exists(conn: &Connection, conversation_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM conversations WHERE id = ?1 AND deleted_at IS NULL",
        params![conversation_id],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

const AUDIENCE_FILTER: &str =
    "(user_id = ?1 OR (user_id IS NULL AND business_id = ?2 AND target_role = ?3))";

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, business_id, user_id, created_at, updated_at
                     FROM conversations WHERE id = ?1 AND deleted_at IS NULL",
                    params![id],
                    conversation_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn find_or_create_conversation(
        &self,
        business_id: &str,
        user_id: &str,
    ) -> Result<Conversation, StoreError> {
        let business_id = business_id.to_string();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let business_exists: bool = conn.query_row(
                "SELECT COUNT(*) FROM businesses WHERE id = ?1 AND deleted_at IS NULL",
                params![business_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )?;
            if !business_exists {
                return Err(StoreError::NotFound("business"));
            }

            let existing = conn
                .query_row(
                    "SELECT id, business_id, user_id, created_at, updated_at
                     FROM conversations
                     WHERE business_id = ?1 AND user_id = ?2 AND deleted_at IS NULL
                     ORDER BY created_at ASC LIMIT 1",
                    params![business_id, user_id],
                    conversation_from_row,
                )
                .optional()?;
            if let Some(conversation) = existing {
                return Ok(conversation);
            }

            let now = Utc::now();
            let conversation = Conversation {
                id: Uuid::now_v7().to_string(),
                business_id,
                user_id: Some(user_id),
                created_at: now,
                updated_at: now,
            };
            conn.execute(
                "INSERT INTO conversations (id, business_id, user_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    conversation.id,
                    conversation.business_id,
                    conversation.user_id,
                    format_timestamp(&now),
                ],
            )?;
            Ok(conversation)
        })
        .await
    }

    async fn persist_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            if !conversation_exists(&tx, &message.conversation_id)? {
                return Err(StoreError::NotFound("conversation"));
            }

            let id = Uuid::now_v7().to_string();
            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_role, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    message.conversation_id,
                    message.sender_role.as_str(),
                    message.sender_id,
                    message.content,
                    format_timestamp(&created_at),
                ],
            )?;

            // Unknown media ids are skipped rather than failing the message
            for media_id in &message.media_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO message_media (message_id, media_id)
                     SELECT ?1, id FROM media WHERE id = ?2",
                    params![id, media_id],
                )?;
            }
            let media = load_media(&tx, &id)?;
            tx.commit()?;

            Ok(ChatMessage {
                id,
                content: message.content,
                sender_role: message.sender_role,
                sender_id: message.sender_id,
                conversation_id: message.conversation_id,
                created_at,
                media,
            })
        })
        .await
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![conversation_id, format_timestamp(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn fetch_message_page(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Option<MessagePage>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            if !conversation_exists(conn, &conversation_id)? {
                return Ok(None);
            }

            let total_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND deleted_at IS NULL",
                params![conversation_id],
                |row| row.get(0),
            )?;

            let offset = i64::from(page.max(1) - 1) * i64::from(limit);
            let mut stmt = conn.prepare_cached(
                "SELECT id, content, sender_role, sender_id, conversation_id, created_at
                 FROM messages
                 WHERE conversation_id = ?1 AND deleted_at IS NULL
                 ORDER BY rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let mut messages = stmt
                .query_map(params![conversation_id, i64::from(limit), offset], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            // Newest page first, but oldest-to-newest within the page
            messages.reverse();
            for message in &mut messages {
                message.media = load_media(conn, &message.id)?;
            }

            Ok(Some(MessagePage {
                messages,
                total_count: total_count as u64,
            }))
        })
        .await
    }

    async fn upsert_read_receipt(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<ReadReceipt, StoreError> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            if !conversation_exists(conn, &conversation_id)? {
                return Err(StoreError::NotFound("conversation"));
            }
            let now = Utc::now();
            // read_through pins the receipt to the newest message row, so a
            // message stored in the same millisecond is still counted
            conn.execute(
                "INSERT INTO conversation_reads (id, user_id, conversation_id, last_read_at, read_through)
                 VALUES (?1, ?2, ?3, ?4,
                     (SELECT COALESCE(MAX(rowid), 0) FROM messages WHERE conversation_id = ?3))
                 ON CONFLICT(user_id, conversation_id) DO UPDATE SET
                     last_read_at = excluded.last_read_at,
                     read_through = excluded.read_through",
                params![
                    Uuid::now_v7().to_string(),
                    user_id,
                    conversation_id,
                    format_timestamp(&now),
                ],
            )?;
            Ok(ReadReceipt {
                user_id,
                conversation_id,
                last_read_at: now,
            })
        })
        .await
    }

    async fn unread_count(
        &self,
        conversation_id: &str,
        reader: &ParticipantId,
    ) -> Result<u64, StoreError> {
        let conversation_id = conversation_id.to_string();
        let reader = reader.clone();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND deleted_at IS NULL
                   AND rowid > COALESCE(
                       (SELECT read_through FROM conversation_reads
                        WHERE user_id = ?2 AND conversation_id = ?1), 0)
                   AND NOT (sender_role = ?3 AND sender_id = ?2)",
                params![conversation_id, reader.user_id, reader.role.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn display_name(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let name: Option<Option<String>> = conn
                .query_row(
                    "SELECT name FROM users WHERE id = ?1 AND deleted_at IS NULL",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(name.flatten())
        })
        .await
    }

    async fn create_notification_record(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        self.with_conn(move |conn| {
            let record = Notification {
                id: Uuid::now_v7().to_string(),
                user_id: notification.user_id,
                business_id: notification.business_id,
                target_role: notification.target_role,
                title: notification.title,
                content: notification.content,
                kind: notification.kind,
                conversation_id: notification.conversation_id,
                is_read: false,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO notifications
                 (id, user_id, business_id, target_role, title, content, type, conversation_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
                params![
                    record.id,
                    record.user_id,
                    record.business_id,
                    record.target_role.as_str(),
                    record.title,
                    record.content,
                    record.kind.as_str(),
                    record.conversation_id,
                    format_timestamp(&record.created_at),
                ],
            )?;
            Ok(record)
        })
        .await
    }

    async fn list_notifications(
        &self,
        audience: &NotificationAudience,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Notification>, StoreError> {
        let audience = audience.clone();
        self.with_conn(move |conn| {
            let offset = i64::from(page.max(1) - 1) * i64::from(limit);
            let sql = format!(
                "SELECT id, user_id, business_id, target_role, title, content, type,
                        conversation_id, is_read, created_at
                 FROM notifications
                 WHERE {AUDIENCE_FILTER}
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4 OFFSET ?5"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    audience.user_id,
                    audience.business_id,
                    audience.role.as_str(),
                    i64::from(limit),
                    offset,
                ],
                notification_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn mark_notifications_read(
        &self,
        audience: &NotificationAudience,
        ids: &[String],
    ) -> Result<usize, StoreError> {
        let audience = audience.clone();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let sql = format!("UPDATE notifications SET is_read = 1 WHERE id = ?4 AND {AUDIENCE_FILTER}");
            let mut updated = 0;
            for id in &ids {
                updated += conn.execute(
                    &sql,
                    params![audience.user_id, audience.business_id, audience.role.as_str(), id],
                )?;
            }
            Ok(updated)
        })
        .await
    }

    async fn delete_notification(
        &self,
        audience: &NotificationAudience,
        id: &str,
    ) -> Result<bool, StoreError> {
        let audience = audience.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("DELETE FROM notifications WHERE id = ?4 AND {AUDIENCE_FILTER}");
            let deleted = conn.execute(
                &sql,
                params![audience.user_id, audience.business_id, audience.role.as_str(), id],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn load_room_state(&self, room_key: &str) -> Result<RoomState, StoreError> {
        let room_key = room_key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(Option<String>, Option<String>)> = conn
                .query_row(
                    "SELECT conversation_id, cleanup_deadline FROM room_state WHERE room_key = ?1",
                    params![room_key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((conversation_id, deadline)) => Ok(RoomState {
                    conversation_id,
                    cleanup_deadline: deadline.map(|d| parse_timestamp(&d)).transpose()?,
                }),
                None => Ok(RoomState::default()),
            }
        })
        .await
    }

    async fn save_room_state(&self, room_key: &str, state: &RoomState) -> Result<(), StoreError> {
        let room_key = room_key.to_string();
        let state = state.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO room_state (room_key, conversation_id, cleanup_deadline, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(room_key) DO UPDATE SET
                    conversation_id = excluded.conversation_id,
                    cleanup_deadline = excluded.cleanup_deadline,
                    updated_at = excluded.updated_at",
                params![
                    room_key,
                    state.conversation_id,
                    state.cleanup_deadline.as_ref().map(format_timestamp),
                    format_timestamp(&Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_room_state(&self, room_key: &str) -> Result<(), StoreError> {
        let room_key = room_key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM room_state WHERE room_key = ?1", params![room_key])?;
            Ok(())
        })
        .await
    }

    async fn due_room_states(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT room_key FROM room_state
                 WHERE cleanup_deadline IS NOT NULL AND cleanup_deadline <= ?1",
            )?;
            let keys = stmt
                .query_map(params![format_timestamp(&now)], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }
}
