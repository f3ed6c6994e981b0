//! CRUD operations for [`Call`] records.
//!
//! Call records never affect message delivery correctness; they exist so
//! clients can render a call history and terminal call states.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use courier_shared::{CallKind, CallStatus};

use crate::chats::{parse_opt_ts, parse_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Call;

impl Database {
    pub fn create_call(&self, call: &Call) -> Result<()> {
        self.conn().execute(
            "INSERT INTO calls (id, caller_id, receiver_id, kind, status, duration,
                                started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                call.id.to_string(),
                call.caller_id.to_string(),
                call.receiver_id.to_string(),
                call.kind.as_str(),
                call.status.as_str(),
                call.duration,
                call.started_at.to_rfc3339(),
                call.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_call(&self, id: Uuid) -> Result<Call> {
        self.conn()
            .query_row(
                "SELECT id, caller_id, receiver_id, kind, status, duration, started_at, ended_at
                 FROM calls WHERE id = ?1",
                params![id.to_string()],
                row_to_call,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn set_call_status(&self, id: Uuid, status: CallStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE calls SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        Ok(())
    }

    /// Record the terminal state, duration, and end timestamp.
    pub fn end_call(
        &self,
        id: Uuid,
        status: CallStatus,
        duration_secs: u64,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE calls SET status = ?2, duration = ?3, ended_at = ?4 WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                duration_secs,
                ended_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Recent calls by or to a user, newest first.
    pub fn calls_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<Call>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, caller_id, receiver_id, kind, status, duration, started_at, ended_at
             FROM calls
             WHERE caller_id = ?1 OR receiver_id = ?1
             ORDER BY started_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![user_id.to_string(), limit], row_to_call)?;

        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<Call> {
    let parse_id = |idx: usize, s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };

    let id_str: String = row.get(0)?;
    let caller_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let started_str: String = row.get(6)?;
    let ended_str: Option<String> = row.get(7)?;

    let kind = CallKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown call kind: {kind_str}").into(),
        )
    })?;
    let status = CallStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown call status: {status_str}").into(),
        )
    })?;

    Ok(Call {
        id: parse_id(0, &id_str)?,
        caller_id: parse_id(1, &caller_str)?,
        receiver_id: parse_id(2, &receiver_str)?,
        kind,
        status,
        duration: row.get(5)?,
        started_at: parse_ts(&started_str, 6)?,
        ended_at: parse_opt_ts(ended_str, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let caller = Uuid::new_v4();
        let receiver = Uuid::new_v4();

        let call = Call::initiate(caller, receiver, CallKind::Video);
        db.create_call(&call).unwrap();

        let loaded = db.get_call(call.id).unwrap();
        assert_eq!(loaded.status, CallStatus::Initiated);

        db.end_call(call.id, CallStatus::Completed, 42, Utc::now()).unwrap();
        let loaded = db.get_call(call.id).unwrap();
        assert_eq!(loaded.status, CallStatus::Completed);
        assert_eq!(loaded.duration, 42);
        assert!(loaded.ended_at.is_some());
    }

    #[test]
    fn history_covers_both_directions() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        db.create_call(&Call::initiate(a, b, CallKind::Audio)).unwrap();
        db.create_call(&Call::initiate(b, a, CallKind::Audio)).unwrap();
        db.create_call(&Call::initiate(b, c, CallKind::Audio)).unwrap();

        assert_eq!(db.calls_for_user(a, 50).unwrap().len(), 2);
        assert_eq!(db.calls_for_user(b, 50).unwrap().len(), 3);
    }
}
