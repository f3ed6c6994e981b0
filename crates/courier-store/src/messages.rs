//! CRUD operations for messages: insertion, hydration, visibility,
//! receipts, soft deletes, pinning, release claiming, and retention.
//!
//! The release flag transition and the retention soft-delete are the two
//! writes the sweepers depend on; both are single conditional statements so
//! re-running a sweep can never double-apply.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use courier_shared::{Attachment, DeliveryStatus, ForwardInfo, Message};

use crate::chats::{parse_opt_ts, parse_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, body, encrypted_body, attachments, \
     reply_to, forward_sender, forward_chat, status, scheduled_at, is_released, \
     deleted_for_everyone, is_pinned, pinned_by, pinned_at, created_at";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let attachments = serde_json::to_string(&message.attachments)?;
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, body, encrypted_body, attachments,
                                   reply_to, forward_sender, forward_chat, status, scheduled_at,
                                   is_released, deleted_for_everyone, is_pinned, pinned_by,
                                   pinned_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.body,
                message.encrypted_body,
                attachments,
                message.reply_to.map(|id| id.to_string()),
                message.forwarded_from.as_ref().map(|f| f.original_sender.to_string()),
                message.forwarded_from.as_ref().map(|f| f.original_chat.to_string()),
                message.status.as_str(),
                message.scheduled_at.map(|t| t.to_rfc3339()),
                message.is_released,
                message.deleted_for_everyone,
                message.is_pinned,
                message.pinned_by.map(|id| id.to_string()),
                message.pinned_at.map(|t| t.to_rfc3339()),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a message with receipts, soft-delete set, and reactions
    /// hydrated.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        let mut message = self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_message)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        self.hydrate(&mut message)?;
        Ok(message)
    }

    /// Messages of a chat visible to `viewer`, oldest first.
    ///
    /// Applies the visibility invariant in SQL: soft-deleted and unreleased
    /// messages (other than the viewer's own) are excluded, as is anything
    /// older than the viewer's clear point for this chat. Messages deleted
    /// for everyone are returned as tombstones with their content stripped
    /// so clients can render the marker in place.
    pub fn messages_for_chat(
        &self,
        chat_id: Uuid,
        viewer: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        // RFC 3339 UTC timestamps compare chronologically as strings.
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.chat_id = ?1
               AND (m.is_released = 1 OR m.sender_id = ?2)
               AND NOT EXISTS (SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?2)
               AND m.created_at > COALESCE(
                     (SELECT cm.cleared_at FROM chat_members cm
                      WHERE cm.chat_id = m.chat_id AND cm.user_id = ?2), '')
             ORDER BY m.created_at ASC
             LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![chat_id.to_string(), viewer.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            self.hydrate(&mut message)?;
            if message.deleted_for_everyone {
                message.body = None;
                message.encrypted_body = None;
                message.attachments.clear();
            }
            messages.push(message);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Receipts
    // ------------------------------------------------------------------

    /// Record live delivery to the given recipients and bump the message
    /// status to `delivered`.
    pub fn mark_delivered(&self, message_id: Uuid, recipients: &[Uuid]) -> Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }

        let tx = self.conn().unchecked_transaction()?;
        for recipient in recipients {
            tx.execute(
                "INSERT INTO message_receipts (message_id, user_id, delivered, seen)
                 VALUES (?1, ?2, 1, 0)
                 ON CONFLICT(message_id, user_id) DO UPDATE SET delivered = 1",
                params![message_id.to_string(), recipient.to_string()],
            )?;
        }
        tx.execute(
            "UPDATE messages SET status = 'delivered' WHERE id = ?1 AND status = 'sent'",
            params![message_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Mark every released message in the chat as seen by `reader` and
    /// return how many messages transitioned. The reader's own messages
    /// are skipped.
    pub fn mark_read_all(&self, chat_id: Uuid, reader: Uuid) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO message_receipts (message_id, user_id, delivered, seen)
             SELECT m.id, ?2, 1, 1 FROM messages m
             WHERE m.chat_id = ?1 AND m.sender_id != ?2 AND m.is_released = 1
             ON CONFLICT(message_id, user_id) DO UPDATE SET delivered = 1, seen = 1",
            params![chat_id.to_string(), reader.to_string()],
        )?;

        let updated = tx.execute(
            "UPDATE messages SET status = 'seen'
             WHERE chat_id = ?1 AND sender_id != ?2 AND is_released = 1
               AND status != 'seen'",
            params![chat_id.to_string(), reader.to_string()],
        )?;

        tx.commit()?;
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Soft-delete for one viewer. Returns `true` if the marker was newly
    /// written (idempotent via the primary key).
    pub fn add_deleted_for(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, user_id) VALUES (?1, ?2)",
            params![message_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_deleted_for_everyone(&self, message_id: Uuid) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET deleted_for_everyone = 1 WHERE id = ?1",
            params![message_id.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pinning
    // ------------------------------------------------------------------

    pub fn pin_message(&self, message_id: Uuid, pinned_by: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET is_pinned = 1, pinned_by = ?2, pinned_at = ?3 WHERE id = ?1",
            params![message_id.to_string(), pinned_by.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unpin_message(&self, message_id: Uuid) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET is_pinned = 0, pinned_by = NULL, pinned_at = NULL
             WHERE id = ?1",
            params![message_id.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Release gating
    // ------------------------------------------------------------------

    /// Atomically claim the `is_released` false-to-true transition.
    ///
    /// Exactly one caller wins; only the winner may fan the message out, so
    /// a sweep re-run after a crash can never double-increment unread
    /// counters.
    pub fn claim_release(&self, message_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_released = 1 WHERE id = ?1 AND is_released = 0",
            params![message_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Unreleased messages whose schedule has come due, oldest first.
    pub fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE is_released = 0 AND scheduled_at IS NOT NULL AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            self.hydrate(&mut message)?;
            messages.push(message);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    /// Soft-delete every message older than `cutoff` in chats the user
    /// participates in, for that user only. Returns the number of newly
    /// hidden messages; re-running with no new due messages writes nothing.
    pub fn apply_retention(&self, user_id: Uuid, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, user_id)
             SELECT m.id, ?1 FROM messages m
             JOIN chat_members cm ON cm.chat_id = m.chat_id AND cm.user_id = ?1
             WHERE m.created_at < ?2",
            params![user_id.to_string(), cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    fn hydrate(&self, message: &mut Message) -> Result<()> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, delivered, seen FROM message_receipts WHERE message_id = ?1",
        )?;
        let rows = stmt.query_map(params![message.id.to_string()], |row| {
            let user_str: String = row.get(0)?;
            let delivered: bool = row.get(1)?;
            let seen: bool = row.get(2)?;
            let user = Uuid::parse_str(&user_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok((user, delivered, seen))
        })?;

        message.delivered_to.clear();
        message.read_by.clear();
        for row in rows {
            let (user, delivered, seen) = row?;
            if delivered {
                message.delivered_to.push(user);
            }
            if seen {
                message.read_by.push(user);
            }
        }

        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM message_hidden WHERE message_id = ?1")?;
        let rows = stmt.query_map(params![message.id.to_string()], |row| {
            let s: String = row.get(0)?;
            Uuid::parse_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;
        message.deleted_for = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        message.reactions = self.reactions_for_message(message.id)?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let parse_id = |idx: usize, s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };

    let id_str: String = row.get(0)?;
    let chat_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let attachments_json: String = row.get(5)?;
    let reply_to_str: Option<String> = row.get(6)?;
    let fwd_sender_str: Option<String> = row.get(7)?;
    let fwd_chat_str: Option<String> = row.get(8)?;
    let status_str: String = row.get(9)?;
    let scheduled_str: Option<String> = row.get(10)?;
    let pinned_by_str: Option<String> = row.get(14)?;
    let pinned_at_str: Option<String> = row.get(15)?;
    let created_str: String = row.get(16)?;

    let attachments: Vec<Attachment> = serde_json::from_str(&attachments_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let forwarded_from = match (fwd_sender_str, fwd_chat_str) {
        (Some(sender), Some(chat)) => Some(ForwardInfo {
            original_sender: parse_id(7, &sender)?,
            original_chat: parse_id(8, &chat)?,
        }),
        _ => None,
    };

    let status = DeliveryStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown delivery status: {status_str}").into(),
        )
    })?;

    Ok(Message {
        id: parse_id(0, &id_str)?,
        chat_id: parse_id(1, &chat_str)?,
        sender_id: parse_id(2, &sender_str)?,
        body: row.get(3)?,
        encrypted_body: row.get(4)?,
        attachments,
        reply_to: reply_to_str.map(|s| parse_id(6, &s)).transpose()?,
        forwarded_from,
        reactions: Vec::new(),
        status,
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        deleted_for: Vec::new(),
        deleted_for_everyone: row.get(12)?,
        is_pinned: row.get(13)?,
        pinned_by: pinned_by_str.map(|s| parse_id(14, &s)).transpose()?,
        pinned_at: parse_opt_ts(pinned_at_str, 15)?,
        scheduled_at: parse_opt_ts(scheduled_str, 10)?,
        is_released: row.get(11)?,
        created_at: parse_ts(&created_str, 16)?,
    })
}
