//! CRUD operations for [`Channel`] records.

use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Channel, VersionMeta};
use crate::rows;

const CHANNEL_COLUMNS: &str =
    "id, name, kind, status, details, avatar_url, custom, etag, updated_at, \
     member_count, message_count";

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single channel by id.
    pub fn get_channel(&self, id: &str) -> Result<Channel> {
        self.conn()
            .query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                params![id],
                row_to_channel,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Whether a channel with this id exists.
    pub fn channel_exists(&self, id: &str) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM channels WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// List all channels, ordered by id.
    pub fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id ASC"))?;

        let rows = stmt.query_map([], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a channel by id.  Returns `true` if a row was deleted.
    ///
    /// Member rows cascade; messages do not -- deleting a channel that
    /// still owns messages is refused by the schema.
    pub fn delete_channel(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM channels WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Internal write helpers (used by the upsert/patch engines)
    // ------------------------------------------------------------------

    pub(crate) fn insert_channel_row(&self, ch: &Channel) -> Result<()> {
        self.conn().execute(
            "INSERT INTO channels (id, name, kind, status, details, avatar_url, custom,
                                   etag, updated_at, member_count, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                ch.id,
                ch.name,
                ch.kind,
                ch.status,
                ch.details,
                ch.avatar_url,
                rows::json_to_sql(ch.custom.as_ref()),
                ch.version.etag,
                rows::ts_to_sql(ch.version.updated_at),
                ch.member_count,
                ch.message_count,
            ],
        )?;
        Ok(())
    }

    /// Full-field overwrite of an existing row.  The denormalized counters
    /// are owned by the store, not the remote payload, so they are left
    /// untouched.
    pub(crate) fn replace_channel_row(&self, ch: &Channel) -> Result<()> {
        self.conn().execute(
            "UPDATE channels
             SET name = ?2, kind = ?3, status = ?4, details = ?5, avatar_url = ?6,
                 custom = ?7, etag = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                ch.id,
                ch.name,
                ch.kind,
                ch.status,
                ch.details,
                ch.avatar_url,
                rows::json_to_sql(ch.custom.as_ref()),
                ch.version.etag,
                rows::ts_to_sql(ch.version.updated_at),
            ],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Channel`].
fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        status: row.get(3)?,
        details: row.get(4)?,
        avatar_url: row.get(5)?,
        custom: rows::json_from_sql(6, row.get(6)?)?,
        version: VersionMeta {
            etag: row.get(7)?,
            updated_at: rows::ts_from_sql(8, row.get(8)?)?,
        },
        member_count: row.get(9)?,
        message_count: row.get(10)?,
    })
}
