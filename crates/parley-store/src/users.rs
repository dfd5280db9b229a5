//! CRUD operations for [`User`] records.

use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{User, VersionMeta};
use crate::rows;

const USER_COLUMNS: &str =
    "id, name, kind, status, external_id, avatar_url, email, custom, etag, updated_at";

impl Database {
    /// Fetch a single user by id.
    pub fn get_user(&self, id: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Whether a user with this id exists.
    pub fn user_exists(&self, id: &str) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// List all users, ordered by id.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"))?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Delete a user by id.  Returns `true` if a row was deleted.
    ///
    /// Member rows cascade, so the affected channels' member counts are
    /// recomputed in the same transaction.  Users that still author
    /// messages cannot be deleted (RESTRICT).
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;

        if affected > 0 {
            self.conn().execute(
                "UPDATE channels
                 SET member_count = (SELECT COUNT(*) FROM members
                                     WHERE members.channel_id = channels.id)",
                [],
            )?;
        }

        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Internal write helpers (used by the upsert/patch engines)
    // ------------------------------------------------------------------

    pub(crate) fn insert_user_row(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, kind, status, external_id, avatar_url, email,
                                custom, etag, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id,
                user.name,
                user.kind,
                user.status,
                user.external_id,
                user.avatar_url,
                user.email,
                rows::json_to_sql(user.custom.as_ref()),
                user.version.etag,
                rows::ts_to_sql(user.version.updated_at),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn replace_user_row(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "UPDATE users
             SET name = ?2, kind = ?3, status = ?4, external_id = ?5, avatar_url = ?6,
                 email = ?7, custom = ?8, etag = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                user.id,
                user.name,
                user.kind,
                user.status,
                user.external_id,
                user.avatar_url,
                user.email,
                rows::json_to_sql(user.custom.as_ref()),
                user.version.etag,
                rows::ts_to_sql(user.version.updated_at),
            ],
        )?;
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        status: row.get(3)?,
        external_id: row.get(4)?,
        avatar_url: row.get(5)?,
        email: row.get(6)?,
        custom: rows::json_from_sql(7, row.get(7)?)?,
        version: VersionMeta {
            etag: row.get(8)?,
            updated_at: rows::ts_from_sql(9, row.get(9)?)?,
        },
    })
}
