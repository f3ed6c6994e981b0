//! CRUD operations for [`Chat`] records and per-member conversation state.
//!
//! The unread counter lives on the membership row and is only ever mutated
//! with single-statement SQL increments, so concurrent sends into the same
//! chat cannot lose updates and a non-participant can never gain a counter.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatMember};

/// What happened when a member was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Member removed; the chat still has participants.
    Removed,
    /// Last participant removed; the chat and its messages were deleted.
    ChatDeleted,
    /// The chat is a single-participant self-chat, which is never deleted;
    /// the membership was left in place.
    SelfChatRetained,
}

impl Database {
    // ------------------------------------------------------------------
    // Create / read
    // ------------------------------------------------------------------

    /// Insert a chat together with its initial members in one transaction.
    pub fn create_chat(&self, chat: &Chat, members: &[Uuid], admins: &[Uuid]) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO chats (id, is_group, title, description, last_message, last_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chat.id.to_string(),
                chat.is_group,
                chat.title,
                chat.description,
                chat.last_message,
                chat.last_at.map(|t| t.to_rfc3339()),
                chat.created_at.to_rfc3339(),
            ],
        )?;

        let now = Utc::now().to_rfc3339();
        for member in members {
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, is_admin, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    chat.id.to_string(),
                    member.to_string(),
                    admins.contains(member),
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Find an existing one-to-one chat between two users, or the user's
    /// self-chat when both ids are the same.
    pub fn find_direct_chat(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>> {
        let result = if a == b {
            self.conn().query_row(
                "SELECT c.id FROM chats c
                 JOIN chat_members m ON m.chat_id = c.id AND m.user_id = ?1
                 WHERE c.is_group = 0
                   AND (SELECT COUNT(*) FROM chat_members WHERE chat_id = c.id) = 1
                 LIMIT 1",
                params![a.to_string()],
                |row| row.get::<_, String>(0),
            )
        } else {
            self.conn().query_row(
                "SELECT c.id FROM chats c
                 JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?1
                 JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?2
                 WHERE c.is_group = 0
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get::<_, String>(0),
            )
        };

        match result {
            Ok(id) => Ok(Some(Uuid::parse_str(&id)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn get_chat(&self, id: Uuid) -> Result<Chat> {
        self.conn()
            .query_row(
                "SELECT id, is_group, title, description, last_message, last_at, created_at
                 FROM chats WHERE id = ?1",
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn member_ids(&self, chat_id: Uuid) -> Result<Vec<Uuid>> {
        self.collect_ids(
            "SELECT user_id FROM chat_members WHERE chat_id = ?1
             ORDER BY joined_at ASC, rowid ASC",
            chat_id,
        )
    }

    pub fn admin_ids(&self, chat_id: Uuid) -> Result<Vec<Uuid>> {
        self.collect_ids(
            "SELECT user_id FROM chat_members WHERE chat_id = ?1 AND is_admin = 1
             ORDER BY joined_at ASC, rowid ASC",
            chat_id,
        )
    }

    pub fn chat_ids_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.collect_ids(
            "SELECT chat_id FROM chat_members WHERE user_id = ?1",
            user_id,
        )
    }

    pub fn is_participant(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn is_admin(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_members
             WHERE chat_id = ?1 AND user_id = ?2 AND is_admin = 1",
            params![chat_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<ChatMember> {
        self.conn()
            .query_row(
                "SELECT chat_id, user_id, is_admin, unread, pinned, archived, hidden,
                        cleared_at, joined_at
                 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), user_id.to_string()],
                row_to_member,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn add_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![
                chat_id.to_string(),
                user_id.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_admin(&self, chat_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE chat_members SET is_admin = ?3 WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string(), is_admin],
        )?;
        Ok(())
    }

    /// Remove a member, dropping their unread counter with the row.
    ///
    /// Handles admin succession (the longest-standing remaining member is
    /// promoted if no admin is left) and deletes an emptied chat together
    /// with its messages. A single-participant self-chat is the deliberate
    /// exception and is retained as-is.
    pub fn remove_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<RemovalOutcome> {
        let chat = self.get_chat(chat_id)?;
        let members_before = self.member_ids(chat_id)?;

        if !chat.is_group && members_before.len() == 1 && members_before.contains(&user_id) {
            return Ok(RemovalOutcome::SelfChatRetained);
        }

        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;

        if remaining == 0 {
            tx.execute("DELETE FROM chats WHERE id = ?1", params![chat_id.to_string()])?;
            tx.commit()?;
            return Ok(RemovalOutcome::ChatDeleted);
        }

        // Admin succession: promote the earliest-joined member if the last
        // admin just left.
        let admins_left: i64 = tx.query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND is_admin = 1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;
        if admins_left == 0 {
            tx.execute(
                "UPDATE chat_members SET is_admin = 1
                 WHERE chat_id = ?1 AND user_id =
                   (SELECT user_id FROM chat_members WHERE chat_id = ?1
                    ORDER BY joined_at ASC, rowid ASC LIMIT 1)",
                params![chat_id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(RemovalOutcome::Removed)
    }

    /// Delete a chat outright; messages, membership rows, receipts, and
    /// pending deliveries cascade.
    pub fn delete_chat(&self, chat_id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![chat_id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Per-member counters and flags
    // ------------------------------------------------------------------

    /// Atomic single-statement increment. Returns `false` when the user is
    /// not a participant, in which case no counter is touched.
    pub fn increment_unread(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_members SET unread = unread + 1
             WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn reset_unread(&self, chat_id: Uuid, user_id: Uuid) -> Result<()> {
        self.conn().execute(
            "UPDATE chat_members SET unread = 0 WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        Ok(())
    }

    pub fn unread_count(&self, chat_id: Uuid, user_id: Uuid) -> Result<u32> {
        self.conn()
            .query_row(
                "SELECT unread FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Update the denormalized conversation preview.
    pub fn set_preview(&self, chat_id: Uuid, last_message: &str, last_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET last_message = ?2, last_at = ?3 WHERE id = ?1",
            params![chat_id.to_string(), last_message, last_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Un-hide and un-archive for participants who are actively viewing:
    /// an open conversation must not silently update under an archived
    /// flag.
    pub fn unhide_unarchive(&self, chat_id: Uuid, user_ids: &[Uuid]) -> Result<()> {
        for user_id in user_ids {
            self.conn().execute(
                "UPDATE chat_members SET hidden = 0, archived = 0
                 WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), user_id.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn set_chat_pinned(&self, chat_id: Uuid, user_id: Uuid, pinned: bool) -> Result<()> {
        self.set_member_flag(chat_id, user_id, "pinned", pinned)
    }

    pub fn set_chat_archived(&self, chat_id: Uuid, user_id: Uuid, archived: bool) -> Result<()> {
        self.set_member_flag(chat_id, user_id, "archived", archived)
    }

    pub fn set_chat_hidden(&self, chat_id: Uuid, user_id: Uuid, hidden: bool) -> Result<()> {
        self.set_member_flag(chat_id, user_id, "hidden", hidden)
    }

    pub fn set_cleared_at(&self, chat_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE chat_members SET cleared_at = ?3 WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn set_member_flag(&self, chat_id: Uuid, user_id: Uuid, column: &str, value: bool) -> Result<()> {
        // Column names come from the fixed call sites above, never input.
        let sql = format!(
            "UPDATE chat_members SET {column} = ?3 WHERE chat_id = ?1 AND user_id = ?2"
        );
        self.conn().execute(
            &sql,
            params![chat_id.to_string(), user_id.to_string(), value],
        )?;
        Ok(())
    }

    fn collect_ids(&self, sql: &str, key: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![key.to_string()], |row| {
            let s: String = row.get(0)?;
            Uuid::parse_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id_str: String = row.get(0)?;
    let last_at_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_at = parse_opt_ts(last_at_str, 5)?;
    let created_at = parse_ts(&created_str, 6)?;

    Ok(Chat {
        id,
        is_group: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        last_message: row.get(4)?,
        last_at,
        created_at,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMember> {
    let chat_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let cleared_str: Option<String> = row.get(7)?;
    let joined_str: String = row.get(8)?;

    let parse_id = |idx: usize, s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };

    Ok(ChatMember {
        chat_id: parse_id(0, &chat_str)?,
        user_id: parse_id(1, &user_str)?,
        is_admin: row.get(2)?,
        unread: row.get(3)?,
        pinned: row.get(4)?,
        archived: row.get(5)?,
        hidden: row.get(6)?,
        cleared_at: parse_opt_ts(cleared_str, 7)?,
        joined_at: parse_ts(&joined_str, 8)?,
    })
}

pub(crate) fn parse_ts(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(
    s: Option<String>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s, idx)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    fn fixture(db: &Database, n: usize) -> Vec<Uuid> {
        (0..n)
            .map(|_| {
                let user = User::new(Uuid::new_v4());
                db.create_user(&user).unwrap();
                user.id
            })
            .collect()
    }

    #[test]
    fn unread_counter_is_per_member() {
        let db = Database::open_in_memory().unwrap();
        let users = fixture(&db, 2);
        let chat = Chat::direct();
        db.create_chat(&chat, &users, &[]).unwrap();

        assert!(db.increment_unread(chat.id, users[1]).unwrap());
        assert!(db.increment_unread(chat.id, users[1]).unwrap());
        assert_eq!(db.unread_count(chat.id, users[1]).unwrap(), 2);
        assert_eq!(db.unread_count(chat.id, users[0]).unwrap(), 0);

        db.reset_unread(chat.id, users[1]).unwrap();
        assert_eq!(db.unread_count(chat.id, users[1]).unwrap(), 0);
    }

    #[test]
    fn no_counter_for_non_participants() {
        let db = Database::open_in_memory().unwrap();
        let users = fixture(&db, 3);
        let chat = Chat::direct();
        db.create_chat(&chat, &users[..2], &[]).unwrap();

        // A stranger never gains a counter.
        assert!(!db.increment_unread(chat.id, users[2]).unwrap());
        assert!(matches!(
            db.unread_count(chat.id, users[2]),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn removing_member_drops_counter() {
        let db = Database::open_in_memory().unwrap();
        let users = fixture(&db, 3);
        let chat = Chat::group("team", None);
        db.create_chat(&chat, &users, &[users[0]]).unwrap();

        db.increment_unread(chat.id, users[2]).unwrap();
        assert_eq!(db.remove_member(chat.id, users[2]).unwrap(), RemovalOutcome::Removed);

        assert!(matches!(
            db.unread_count(chat.id, users[2]),
            Err(StoreError::NotFound)
        ));
        // Re-adding starts from zero.
        db.add_member(chat.id, users[2]).unwrap();
        assert_eq!(db.unread_count(chat.id, users[2]).unwrap(), 0);
    }

    #[test]
    fn emptied_chat_is_deleted_with_messages() {
        let db = Database::open_in_memory().unwrap();
        let users = fixture(&db, 2);
        let chat = Chat::group("ghost town", None);
        db.create_chat(&chat, &users, &[users[0]]).unwrap();

        let msg = courier_shared::Message::new(chat.id, users[0]);
        db.insert_message(&msg).unwrap();

        assert_eq!(db.remove_member(chat.id, users[0]).unwrap(), RemovalOutcome::Removed);
        assert_eq!(
            db.remove_member(chat.id, users[1]).unwrap(),
            RemovalOutcome::ChatDeleted
        );

        assert!(matches!(db.get_chat(chat.id), Err(StoreError::NotFound)));
        assert!(matches!(db.get_message(msg.id), Err(StoreError::NotFound)));
    }

    #[test]
    fn self_chat_is_never_deleted() {
        let db = Database::open_in_memory().unwrap();
        let users = fixture(&db, 1);
        let chat = Chat::direct();
        db.create_chat(&chat, &users, &[]).unwrap();

        assert_eq!(
            db.remove_member(chat.id, users[0]).unwrap(),
            RemovalOutcome::SelfChatRetained
        );
        assert!(db.get_chat(chat.id).is_ok());
        assert!(db.is_participant(chat.id, users[0]).unwrap());
    }

    #[test]
    fn find_direct_chat_distinguishes_pair_and_self() {
        let db = Database::open_in_memory().unwrap();
        let users = fixture(&db, 2);

        assert!(db.find_direct_chat(users[0], users[1]).unwrap().is_none());

        let pair = Chat::direct();
        db.create_chat(&pair, &users, &[]).unwrap();
        let own = Chat::direct();
        db.create_chat(&own, &users[..1], &[]).unwrap();

        assert_eq!(db.find_direct_chat(users[0], users[1]).unwrap(), Some(pair.id));
        assert_eq!(db.find_direct_chat(users[1], users[0]).unwrap(), Some(pair.id));
        assert_eq!(db.find_direct_chat(users[0], users[0]).unwrap(), Some(own.id));
    }

    #[test]
    fn admin_succession_promotes_earliest_member() {
        let db = Database::open_in_memory().unwrap();
        let users = fixture(&db, 3);
        let chat = Chat::group("club", None);
        // Creation order fixes joined_at ordering.
        db.create_chat(&chat, &users, &[users[0]]).unwrap();

        db.remove_member(chat.id, users[0]).unwrap();

        let admins = db.admin_ids(chat.id).unwrap();
        assert_eq!(admins, vec![users[1]]);
    }
}
