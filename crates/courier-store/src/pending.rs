//! The pending-delivery queue: durable "message X must reach user Y when
//! they next connect" records.
//!
//! Creation is keyed by `(user, message)` and idempotent, so a retried
//! fan-out cannot enqueue a message twice. Replay order is explicitly
//! unguaranteed; completeness is the contract.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Enqueue a pending delivery. A duplicate `(user, message)` pair is a
    /// no-op; returns `true` when the record was newly created.
    pub fn enqueue_pending(&self, user_id: Uuid, message_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO pending_deliveries (user_id, message_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                user_id.to_string(),
                message_id.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Message ids currently pending for a user. Does not consume the
    /// queue; callers emit first, then [`Database::clear_pending`].
    pub fn pending_message_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT message_id FROM pending_deliveries WHERE user_id = ?1")?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
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

    /// Drop every pending record for the user after replay. Returns the
    /// number of consumed records.
    pub fn clear_pending(&self, user_id: Uuid) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM pending_deliveries WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::Message;

    use crate::models::{Chat, User};

    fn fixture(db: &Database) -> (Uuid, Vec<Uuid>) {
        let users: Vec<Uuid> = (0..2)
            .map(|_| {
                let user = User::new(Uuid::new_v4());
                db.create_user(&user).unwrap();
                user.id
            })
            .collect();
        let chat = Chat::direct();
        db.create_chat(&chat, &users, &[]).unwrap();
        (chat.id, users)
    }

    #[test]
    fn enqueue_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, users) = fixture(&db);
        let msg = Message::new(chat_id, users[0]);
        db.insert_message(&msg).unwrap();

        assert!(db.enqueue_pending(users[1], msg.id).unwrap());
        assert!(!db.enqueue_pending(users[1], msg.id).unwrap());
        assert_eq!(db.pending_message_ids(users[1]).unwrap().len(), 1);
    }

    #[test]
    fn replay_is_complete_then_empty() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, users) = fixture(&db);

        let mut expected = Vec::new();
        for _ in 0..5 {
            let msg = Message::new(chat_id, users[0]);
            db.insert_message(&msg).unwrap();
            db.enqueue_pending(users[1], msg.id).unwrap();
            expected.push(msg.id);
        }

        let mut pending = db.pending_message_ids(users[1]).unwrap();
        pending.sort();
        expected.sort();
        assert_eq!(pending, expected);

        assert_eq!(db.clear_pending(users[1]).unwrap(), 5);
        assert!(db.pending_message_ids(users[1]).unwrap().is_empty());
    }
}
