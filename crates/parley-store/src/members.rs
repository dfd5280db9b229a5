//! CRUD operations for [`Member`] records.
//!
//! The natural key is the `(channel_id, user_id)` pair; the schema enforces
//! at most one row per pair.

use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Member, VersionMeta};
use crate::rows;

const MEMBER_COLUMNS: &str =
    "channel_id, user_id, status, custom, is_present, presence_state, etag, updated_at";

impl Database {
    /// Fetch a single member by its composite key.
    pub fn get_member(&self, channel_id: &str, user_id: &str) -> Result<Member> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {MEMBER_COLUMNS} FROM members
                     WHERE channel_id = ?1 AND user_id = ?2"
                ),
                params![channel_id, user_id],
                row_to_member,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Whether a member row exists for the pair.
    pub fn member_exists(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM members WHERE channel_id = ?1 AND user_id = ?2",
            params![channel_id, user_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// List the members of a channel, ordered by user id.
    pub fn list_members(&self, channel_id: &str) -> Result<Vec<Member>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members
             WHERE channel_id = ?1 ORDER BY user_id ASC"
        ))?;

        let rows = stmt.query_map(params![channel_id], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Delete a member row.  Returns `true` if a row was deleted; the
    /// owning channel's member count is adjusted in the same transaction.
    pub fn delete_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let affected = self.conn().execute(
            "DELETE FROM members WHERE channel_id = ?1 AND user_id = ?2",
            params![channel_id, user_id],
        )?;

        if affected > 0 {
            self.conn().execute(
                "UPDATE channels SET member_count = member_count - 1 WHERE id = ?1",
                params![channel_id],
            )?;
        }

        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Internal write helpers (used by the upsert/patch engines)
    // ------------------------------------------------------------------

    /// Insert a member row without touching counters; the upsert engine
    /// owns the counter bump so it happens inside the caller's transaction.
    pub(crate) fn insert_member_row(&self, member: &Member) -> Result<()> {
        self.conn().execute(
            "INSERT INTO members (channel_id, user_id, status, custom, is_present,
                                  presence_state, etag, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                member.channel_id,
                member.user_id,
                member.status,
                rows::json_to_sql(member.custom.as_ref()),
                member.is_present,
                rows::json_to_sql(member.presence_state.as_ref()),
                member.version.etag,
                rows::ts_to_sql(member.version.updated_at),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn replace_member_row(&self, member: &Member) -> Result<()> {
        self.conn().execute(
            "UPDATE members
             SET status = ?3, custom = ?4, is_present = ?5, presence_state = ?6,
                 etag = ?7, updated_at = ?8
             WHERE channel_id = ?1 AND user_id = ?2",
            params![
                member.channel_id,
                member.user_id,
                member.status,
                rows::json_to_sql(member.custom.as_ref()),
                member.is_present,
                rows::json_to_sql(member.presence_state.as_ref()),
                member.version.etag,
                rows::ts_to_sql(member.version.updated_at),
            ],
        )?;
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`Member`].
fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        channel_id: row.get(0)?,
        user_id: row.get(1)?,
        status: row.get(2)?,
        custom: rows::json_from_sql(3, row.get(3)?)?,
        is_present: row.get(4)?,
        presence_state: rows::json_from_sql(5, row.get(5)?)?,
        version: VersionMeta {
            etag: row.get(6)?,
            updated_at: rows::ts_from_sql(7, row.get(7)?)?,
        },
    })
}
