//! Emoji reactions with toggle semantics.
//!
//! Each user holds at most one reaction per message (primary key on
//! `(message_id, user_id)`): re-reacting with the same emoji removes it,
//! a different emoji replaces it.

use rusqlite::params;
use uuid::Uuid;

use chrono::Utc;
use courier_shared::Reaction;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Apply the toggle and return the message's resulting reaction set.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<Vec<Reaction>> {
        let existing: Option<String> = self
            .conn()
            .query_row(
                "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                params![message_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            Some(current) if current == emoji => {
                self.conn().execute(
                    "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id.to_string(), user_id.to_string()],
                )?;
            }
            Some(_) => {
                self.conn().execute(
                    "UPDATE reactions SET emoji = ?3, created_at = ?4
                     WHERE message_id = ?1 AND user_id = ?2",
                    params![
                        message_id.to_string(),
                        user_id.to_string(),
                        emoji,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }
            None => {
                self.conn().execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        message_id.to_string(),
                        user_id.to_string(),
                        emoji,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }
        }

        self.reactions_for_message(message_id)
    }

    pub fn reactions_for_message(&self, message_id: Uuid) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, emoji FROM reactions
             WHERE message_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let user_str: String = row.get(0)?;
            let emoji: String = row.get(1)?;
            let user_id = Uuid::parse_str(&user_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(Reaction { user_id, emoji })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::Message;

    use crate::models::{Chat, User};

    fn message_fixture(db: &Database) -> (Message, Uuid) {
        let user = User::new(Uuid::new_v4());
        db.create_user(&user).unwrap();
        let chat = Chat::direct();
        db.create_chat(&chat, &[user.id], &[]).unwrap();
        let msg = Message::new(chat.id, user.id);
        db.insert_message(&msg).unwrap();
        (msg, user.id)
    }

    #[test]
    fn same_emoji_toggles_off() {
        let db = Database::open_in_memory().unwrap();
        let (msg, user) = message_fixture(&db);

        let reactions = db.toggle_reaction(msg.id, user, "👍").unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "👍");

        let reactions = db.toggle_reaction(msg.id, user, "👍").unwrap();
        assert!(reactions.is_empty());
    }

    #[test]
    fn different_emoji_replaces() {
        let db = Database::open_in_memory().unwrap();
        let (msg, user) = message_fixture(&db);

        db.toggle_reaction(msg.id, user, "👍").unwrap();
        let reactions = db.toggle_reaction(msg.id, user, "❤️").unwrap();

        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "❤️");
        assert_eq!(reactions[0].user_id, user);
    }

    #[test]
    fn one_reaction_per_user() {
        let db = Database::open_in_memory().unwrap();
        let (msg, user) = message_fixture(&db);
        let other = User::new(Uuid::new_v4());
        db.create_user(&other).unwrap();

        db.toggle_reaction(msg.id, user, "👍").unwrap();
        db.toggle_reaction(msg.id, other.id, "🎉").unwrap();
        let reactions = db.toggle_reaction(msg.id, user, "❤️").unwrap();

        assert_eq!(reactions.len(), 2);
        assert!(reactions.iter().all(|r| r.user_id != user || r.emoji == "❤️"));
    }
}
