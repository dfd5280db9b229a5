//! CRUD operations for [`MessageAction`] records.
//!
//! The primary key is the derived `user_id:parent_timetoken:action_timetoken`
//! identity; changing any of the three inputs produces a different action.

use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{derive_action_id, MessageAction, VersionMeta};
use crate::rows;

const ACTION_COLUMNS: &str =
    "user_id, channel_id, parent_timetoken, action_timetoken, kind, value, etag, updated_at";

impl Database {
    /// Fetch a single action by its three identity inputs.
    pub fn get_action(
        &self,
        user_id: &str,
        parent_timetoken: i64,
        action_timetoken: i64,
    ) -> Result<MessageAction> {
        let id = derive_action_id(user_id, parent_timetoken, action_timetoken);
        self.conn()
            .query_row(
                &format!("SELECT {ACTION_COLUMNS} FROM message_actions WHERE id = ?1"),
                params![id],
                row_to_action,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List the actions attached to a message, oldest action first.
    pub fn list_actions_for_message(&self, message_id: &str) -> Result<Vec<MessageAction>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ACTION_COLUMNS} FROM message_actions
             WHERE parent_message_id = ?1
             ORDER BY action_timetoken ASC"
        ))?;

        let rows = stmt.query_map(params![message_id], row_to_action)?;

        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    /// Delete an action by its three identity inputs.  Returns `true` if a
    /// row was deleted.
    pub fn delete_action(
        &self,
        user_id: &str,
        parent_timetoken: i64,
        action_timetoken: i64,
    ) -> Result<bool> {
        let id = derive_action_id(user_id, parent_timetoken, action_timetoken);
        let affected = self
            .conn()
            .execute("DELETE FROM message_actions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Internal write helpers (used by the upsert engine)
    // ------------------------------------------------------------------

    pub(crate) fn action_row_exists(&self, id: &str) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM message_actions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub(crate) fn insert_action_row(
        &self,
        action: &MessageAction,
        parent_message_id: &str,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO message_actions (id, user_id, channel_id, parent_message_id,
                                          parent_timetoken, action_timetoken, kind, value,
                                          etag, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                action.derived_id(),
                action.user_id,
                action.channel_id,
                parent_message_id,
                action.parent_timetoken,
                action.action_timetoken,
                action.kind,
                action.value,
                action.version.etag,
                rows::ts_to_sql(action.version.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Full-field overwrite of an existing action row.  The identity inputs
    /// are part of the derived primary key and therefore never change here.
    pub(crate) fn replace_action_row(&self, action: &MessageAction) -> Result<()> {
        self.conn().execute(
            "UPDATE message_actions
             SET kind = ?2, value = ?3, etag = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                action.derived_id(),
                action.kind,
                action.value,
                action.version.etag,
                rows::ts_to_sql(action.version.updated_at),
            ],
        )?;
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`MessageAction`].
fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageAction> {
    Ok(MessageAction {
        user_id: row.get(0)?,
        channel_id: row.get(1)?,
        parent_timetoken: row.get(2)?,
        action_timetoken: row.get(3)?,
        kind: row.get(4)?,
        value: row.get(5)?,
        version: VersionMeta {
            etag: row.get(6)?,
            updated_at: rows::ts_from_sql(7, row.get(7)?)?,
        },
    })
}
