//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `channels`, `users`, `members` and
//! `messages`, each with a unique-key index on its natural or composite id.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id            TEXT PRIMARY KEY NOT NULL,   -- remote identifier
    name          TEXT,
    kind          TEXT NOT NULL DEFAULT 'default',
    status        TEXT,
    details       TEXT,
    avatar_url    TEXT,
    custom        TEXT,                        -- opaque JSON blob
    etag          TEXT,                        -- remote version token
    updated_at    TEXT,                        -- ISO-8601 / RFC-3339
    member_count  INTEGER NOT NULL DEFAULT 0,  -- denormalized aggregate
    message_count INTEGER NOT NULL DEFAULT 0
);

-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,     -- remote identifier
    name        TEXT,
    kind        TEXT NOT NULL DEFAULT 'default',
    status      TEXT,
    external_id TEXT,
    avatar_url  TEXT,
    email       TEXT,
    custom      TEXT,
    etag        TEXT,
    updated_at  TEXT
);

-- ----------------------------------------------------------------
-- Members (Channel x User join with presence)
-- ----------------------------------------------------------------
-- Join rows cascade with their channel and user; at most one row exists
-- per (channel_id, user_id) pair.
CREATE TABLE IF NOT EXISTS members (
    channel_id     TEXT NOT NULL,
    user_id        TEXT NOT NULL,
    status         TEXT,
    custom         TEXT,
    is_present     INTEGER,                    -- nullable boolean 0/1
    presence_state TEXT,                       -- opaque JSON
    etag           TEXT,
    updated_at     TEXT,

    PRIMARY KEY (channel_id, user_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)    REFERENCES users(id)    ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user ON members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- Messages never go away implicitly: deleting a channel or a user is
-- refused while it still owns messages (RESTRICT, not CASCADE).
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL,  -- client-assigned, stable
    timetoken      INTEGER NOT NULL DEFAULT 0, -- 0 until acknowledged
    created_at     TEXT NOT NULL,
    content        TEXT NOT NULL,              -- tagged-union JSON
    custom         TEXT,
    author_user_id TEXT NOT NULL,
    channel_id     TEXT NOT NULL,
    etag           TEXT,
    updated_at     TEXT,

    FOREIGN KEY (channel_id)     REFERENCES channels(id) ON DELETE RESTRICT,
    FOREIGN KEY (author_user_id) REFERENCES users(id)    ON DELETE RESTRICT
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_tt
    ON messages(channel_id, timetoken DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
