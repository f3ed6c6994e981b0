//! Domain model structs persisted in the database.
//!
//! The wire-facing [`courier_shared::Message`] lives in `courier-shared`
//! because it crosses the socket verbatim; everything here is store-side
//! only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_shared::{CallKind, CallStatus};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user account. Identity fields are owned by the account subsystem; the
/// core reads and writes presence and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_disabled: bool,
    /// Retention window in days; 0 disables retention for this user.
    pub retention_days: u32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            display_name: None,
            phone: None,
            avatar: None,
            is_online: false,
            last_seen: None,
            is_disabled: false,
            retention_days: 0,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation (pair, group, or single-participant self-chat).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: Uuid,
    pub is_group: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Denormalized preview of the most recent released message.
    pub last_message: Option<String>,
    pub last_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn direct() -> Self {
        Self {
            id: Uuid::new_v4(),
            is_group: false,
            title: None,
            description: None,
            last_message: None,
            last_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn group(title: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            is_group: true,
            title: Some(title.into()),
            description,
            last_message: None,
            last_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-member conversation state. The unread counter exists only while the
/// membership row does, so removing a participant drops their counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub unread: u32,
    pub pinned: bool,
    pub archived: bool,
    pub hidden: bool,
    pub cleared_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// A call record, created at initiation and mutated at accept/reject/end.
/// Never required for message delivery correctness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Call {
    pub id: Uuid,
    pub caller_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: CallKind,
    pub status: CallStatus,
    /// Seconds, filled in when the call ends.
    pub duration: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Call {
    pub fn initiate(caller_id: Uuid, receiver_id: Uuid, kind: CallKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller_id,
            receiver_id,
            kind,
            status: CallStatus::Initiated,
            duration: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}
