use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Message actions (reactions / annotations)
CREATE TABLE IF NOT EXISTS message_actions (
    id                TEXT PRIMARY KEY NOT NULL, -- user_id:parent_tt:action_tt
    user_id           TEXT NOT NULL,
    channel_id        TEXT NOT NULL,
    parent_message_id TEXT NOT NULL,             -- FK -> messages(id)
    parent_timetoken  INTEGER NOT NULL,
    action_timetoken  INTEGER NOT NULL,
    kind              TEXT NOT NULL,             -- e.g. 'reaction'
    value             TEXT NOT NULL,             -- e.g. emoji character(s)
    etag              TEXT,
    updated_at        TEXT,

    FOREIGN KEY (parent_message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)           REFERENCES users(id)    ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_actions_parent ON message_actions(parent_message_id);
CREATE INDEX IF NOT EXISTS idx_actions_channel ON message_actions(channel_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
