use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Businesses, users, conversations, messages

CREATE TABLE businesses (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT,
    role TEXT NOT NULL DEFAULT 'CLIENT',
    business_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    FOREIGN KEY (business_id) REFERENCES businesses(id)
);

CREATE INDEX idx_users_business ON users(business_id);

CREATE TABLE conversations (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL,
    user_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    FOREIGN KEY (business_id) REFERENCES businesses(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX idx_conversations_business ON conversations(business_id);
CREATE INDEX idx_conversations_user ON conversations(user_id);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sender_role TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    deleted_at TEXT,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
",
        ),
        M::up(
            "-- Migration 2: Media attachments

CREATE TABLE media (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL
);

CREATE TABLE message_media (
    message_id TEXT NOT NULL,
    media_id TEXT NOT NULL,
    PRIMARY KEY (message_id, media_id),
    FOREIGN KEY (message_id) REFERENCES messages(id),
    FOREIGN KEY (media_id) REFERENCES media(id)
);

CREATE INDEX idx_message_media_message ON message_media(message_id);
",
        ),
        M::up(
            "-- Migration 3: Read tracking and notifications

CREATE TABLE conversation_reads (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    last_read_at TEXT NOT NULL,
    UNIQUE (user_id, conversation_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE TABLE notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    business_id TEXT NOT NULL,
    target_role TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    type TEXT NOT NULL,
    conversation_id TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE INDEX idx_notifications_user ON notifications(user_id, created_at);
CREATE INDEX idx_notifications_business_role ON notifications(business_id, target_role, created_at);
",
        ),
        M::up(
            "-- Migration 4: Durable chat room state

CREATE TABLE room_state (
    room_key TEXT PRIMARY KEY,
    conversation_id TEXT,
    cleanup_deadline TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_room_state_deadline ON room_state(cleanup_deadline);
",
        ),
        M::up(
            "-- Migration 5: Read receipts record the last message they cover

ALTER TABLE conversation_reads ADD COLUMN read_through INTEGER NOT NULL DEFAULT 0;
",
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }
}
