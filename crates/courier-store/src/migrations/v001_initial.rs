//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `user_blocks`, `chats`,
//! `chat_members`, `messages`, `message_receipts`, `message_hidden`,
//! `reactions`, `pending_deliveries`, and `calls`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    display_name   TEXT,
    phone          TEXT UNIQUE,
    avatar         TEXT,
    is_online      INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    last_seen      TEXT,                       -- ISO-8601 / RFC-3339
    is_disabled    INTEGER NOT NULL DEFAULT 0,
    retention_days INTEGER NOT NULL DEFAULT 0, -- 0 = retention disabled
    created_at     TEXT NOT NULL
);

-- Block lists: row (a, b) means a has blocked b.
CREATE TABLE IF NOT EXISTS user_blocks (
    user_id    TEXT NOT NULL,
    blocked_id TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_id, blocked_id),
    FOREIGN KEY (user_id)    REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (blocked_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id           TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    is_group     INTEGER NOT NULL DEFAULT 0,
    title        TEXT,
    description  TEXT,
    last_message TEXT,                         -- denormalized preview
    last_at      TEXT,
    created_at   TEXT NOT NULL
);

-- Membership defines the room. Per-member state (unread counter, flags)
-- lives on the membership row so removing a member drops it atomically.
CREATE TABLE IF NOT EXISTS chat_members (
    chat_id    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    is_admin   INTEGER NOT NULL DEFAULT 0,
    unread     INTEGER NOT NULL DEFAULT 0,
    pinned     INTEGER NOT NULL DEFAULT 0,
    archived   INTEGER NOT NULL DEFAULT 0,
    hidden     INTEGER NOT NULL DEFAULT 0,
    cleared_at TEXT,
    joined_at  TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                   TEXT PRIMARY KEY NOT NULL, -- UUID v4
    chat_id              TEXT NOT NULL,
    sender_id            TEXT NOT NULL,
    body                 TEXT,
    encrypted_body       TEXT,
    attachments          TEXT NOT NULL DEFAULT '[]', -- JSON array
    reply_to             TEXT,
    forward_sender       TEXT,
    forward_chat         TEXT,
    status               TEXT NOT NULL DEFAULT 'sent',
    scheduled_at         TEXT,
    is_released          INTEGER NOT NULL DEFAULT 1,
    deleted_for_everyone INTEGER NOT NULL DEFAULT 0,
    is_pinned            INTEGER NOT NULL DEFAULT 0,
    pinned_by            TEXT,
    pinned_at            TEXT,
    created_at           TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at);

-- Release sweeper scan: unreleased scheduled messages only.
CREATE INDEX IF NOT EXISTS idx_messages_unreleased
    ON messages(scheduled_at) WHERE is_released = 0;

-- Per-recipient delivered/seen receipts.
CREATE TABLE IF NOT EXISTS message_receipts (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    delivered  INTEGER NOT NULL DEFAULT 0,
    seen       INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- Per-viewer soft delete ("deleted for me"); also written by the
-- retention sweeper.
CREATE TABLE IF NOT EXISTS message_hidden (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- One reaction per user per message, enforced by the primary key.
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Pending deliveries
-- ----------------------------------------------------------------
-- "Message X must reach user Y when they next connect". Keyed by
-- (user, message) so at-least-once creation stays idempotent.
CREATE TABLE IF NOT EXISTS pending_deliveries (
    user_id    TEXT NOT NULL,
    message_id TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_id, message_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Calls
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS calls (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    caller_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    kind        TEXT NOT NULL,                 -- audio | video
    status      TEXT NOT NULL,                 -- initiated | completed | ...
    duration    INTEGER NOT NULL DEFAULT 0,    -- seconds
    started_at  TEXT NOT NULL,
    ended_at    TEXT
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
