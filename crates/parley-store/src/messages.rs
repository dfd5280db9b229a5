//! CRUD operations for [`Message`] records.

use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageContent, VersionMeta};
use crate::rows;

const MESSAGE_COLUMNS: &str =
    "id, timetoken, created_at, content, custom, author_user_id, channel_id, etag, updated_at";

impl Database {
    /// Fetch a single message by its content-level id.
    ///
    /// Lookups key on `id`, never on `timetoken` -- the timetoken changes
    /// from `0` to a server value once a send is acknowledged.
    pub fn get_message(&self, id: &str) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Whether a message with this id exists.
    pub fn message_exists(&self, id: &str) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Find a message by its channel and acknowledged timetoken.
    ///
    /// Unacknowledged messages (timetoken 0) are not addressable this way.
    pub fn find_message_by_timetoken(
        &self,
        channel_id: &str,
        timetoken: i64,
    ) -> Result<Option<Message>> {
        if timetoken == 0 {
            return Ok(None);
        }
        match self.conn().query_row(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE channel_id = ?1 AND timetoken = ?2"
            ),
            params![channel_id, timetoken],
            row_to_message,
        ) {
            Ok(msg) => Ok(Some(msg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// List messages of a channel, newest timetoken first.
    pub fn list_messages(&self, channel_id: &str, limit: u32, offset: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel_id = ?1
             ORDER BY timetoken DESC, created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![channel_id, limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete a message by id.  Returns `true` if a row was deleted; the
    /// owning channel's message count is adjusted in the same transaction.
    /// Actions on the message cascade.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let channel_id: Option<String> = match self.conn().query_row(
            "SELECT channel_id FROM messages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        ) {
            Ok(cid) => Some(cid),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(StoreError::Sqlite(e)),
        };

        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id])?;

        if let (true, Some(cid)) = (affected > 0, channel_id) {
            self.conn().execute(
                "UPDATE channels SET message_count = message_count - 1 WHERE id = ?1",
                params![cid],
            )?;
        }

        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Internal write helpers (used by the upsert/patch engines)
    // ------------------------------------------------------------------

    /// Insert a message row without touching counters; the upsert engine
    /// owns the counter bump so it happens inside the caller's transaction.
    pub(crate) fn insert_message_row(&self, msg: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, timetoken, created_at, content, custom,
                                   author_user_id, channel_id, etag, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.id,
                msg.timetoken,
                msg.created_at.to_rfc3339(),
                serde_json::to_string(&msg.content)?,
                rows::json_to_sql(msg.custom.as_ref()),
                msg.author_user_id,
                msg.channel_id,
                msg.version.etag,
                rows::ts_to_sql(msg.version.updated_at),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn replace_message_row(&self, msg: &Message) -> Result<()> {
        self.conn().execute(
            "UPDATE messages
             SET timetoken = ?2, created_at = ?3, content = ?4, custom = ?5,
                 author_user_id = ?6, channel_id = ?7, etag = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                msg.id,
                msg.timetoken,
                msg.created_at.to_rfc3339(),
                serde_json::to_string(&msg.content)?,
                rows::json_to_sql(msg.custom.as_ref()),
                msg.author_user_id,
                msg.channel_id,
                msg.version.etag,
                rows::ts_to_sql(msg.version.updated_at),
            ],
        )?;
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let content_raw: String = row.get(3)?;
    let content: MessageContent =
        serde_json::from_str(&content_raw).map_err(|e| rows::conversion_err(3, e))?;

    Ok(Message {
        id: row.get(0)?,
        timetoken: row.get(1)?,
        created_at: rows::required_ts_from_sql(2, row.get(2)?)?,
        content,
        custom: rows::json_from_sql(4, row.get(4)?)?,
        author_user_id: row.get(5)?,
        channel_id: row.get(6)?,
        version: VersionMeta {
            etag: row.get(7)?,
            updated_at: rows::ts_from_sql(8, row.get(8)?)?,
        },
    })
}
