//! CRUD operations for [`User`] records, presence fields, and block lists.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, phone, avatar, is_online, last_seen,
                                is_disabled, retention_days, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id.to_string(),
                user.display_name,
                user.phone,
                user.avatar,
                user.is_online,
                user.last_seen.map(|t| t.to_rfc3339()),
                user.is_disabled,
                user.retention_days,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, phone, avatar, is_online, last_seen,
                        is_disabled, retention_days, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Flip the online flag and stamp `last_seen`. Called on first session
    /// connect and last session disconnect.
    pub fn set_presence(&self, id: Uuid, is_online: bool, last_seen: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
            params![id.to_string(), is_online, last_seen.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn set_disabled(&self, id: Uuid, disabled: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET is_disabled = ?2 WHERE id = ?1",
            params![id.to_string(), disabled],
        )?;
        Ok(())
    }

    pub fn is_disabled(&self, id: Uuid) -> Result<bool> {
        self.conn()
            .query_row(
                "SELECT is_disabled FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }

    pub fn set_retention_days(&self, id: Uuid, days: u32) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET retention_days = ?2 WHERE id = ?1",
            params![id.to_string(), days],
        )?;
        Ok(())
    }

    /// Users with an active retention policy, for the retention sweeper.
    pub fn users_with_retention(&self) -> Result<Vec<(Uuid, u32)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, retention_days FROM users WHERE retention_days > 0")?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let days: u32 = row.get(1)?;
            let id = Uuid::parse_str(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok((id, days))
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Block lists
    // ------------------------------------------------------------------

    pub fn block_user(&self, user_id: Uuid, blocked_id: Uuid) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO user_blocks (user_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                user_id.to_string(),
                blocked_id.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Returns `true` if a block existed and was removed.
    pub fn unblock_user(&self, user_id: Uuid, blocked_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM user_blocks WHERE user_id = ?1 AND blocked_id = ?2",
            params![user_id.to_string(), blocked_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Has `user_id` blocked `other`?
    pub fn has_blocked(&self, user_id: Uuid, other: Uuid) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM user_blocks WHERE user_id = ?1 AND blocked_id = ?2",
            params![user_id.to_string(), other.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let last_seen_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_seen = last_seen_str
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        display_name: row.get(1)?,
        phone: row.get(2)?,
        avatar: row.get(3)?,
        is_online: row.get(4)?,
        last_seen,
        is_disabled: row.get(6)?,
        retention_days: row.get(7)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_user(db: &Database) -> User {
        let user = User::new(Uuid::new_v4());
        db.create_user(&user).unwrap();
        user
    }

    #[test]
    fn presence_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let user = fresh_user(&db);

        let at = Utc::now();
        db.set_presence(user.id, true, at).unwrap();

        let loaded = db.get_user(user.id).unwrap();
        assert!(loaded.is_online);
        assert_eq!(loaded.last_seen.unwrap().timestamp(), at.timestamp());
    }

    #[test]
    fn presence_for_unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.set_presence(Uuid::new_v4(), true, Utc::now());
        assert!(matches!(err, Err(StoreError::NotFound)));
    }

    #[test]
    fn block_unblock() {
        let db = Database::open_in_memory().unwrap();
        let a = fresh_user(&db);
        let b = fresh_user(&db);

        assert!(!db.has_blocked(a.id, b.id).unwrap());
        db.block_user(a.id, b.id).unwrap();
        assert!(db.has_blocked(a.id, b.id).unwrap());
        // Directional: b has not blocked a.
        assert!(!db.has_blocked(b.id, a.id).unwrap());

        // Blocking twice is a no-op.
        db.block_user(a.id, b.id).unwrap();

        assert!(db.unblock_user(a.id, b.id).unwrap());
        assert!(!db.unblock_user(a.id, b.id).unwrap());
        assert!(!db.has_blocked(a.id, b.id).unwrap());
    }

    #[test]
    fn retention_listing() {
        let db = Database::open_in_memory().unwrap();
        let a = fresh_user(&db);
        let _b = fresh_user(&db);

        db.set_retention_days(a.id, 7).unwrap();

        let users = db.users_with_retention().unwrap();
        assert_eq!(users, vec![(a.id, 7)]);
    }
}
