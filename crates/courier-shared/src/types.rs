//! Domain value types for messages, reactions, and calls.
//!
//! These structs are both persisted (by `courier-store`) and sent over the
//! wire inside [`crate::events::ServerEvent`] payloads, so they derive
//! `Serialize` and `Deserialize` throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Attachments, reactions, forwarding
// ---------------------------------------------------------------------------

/// A file attached to a message. The upload itself is handled elsewhere;
/// the core only carries the reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    /// Attachment kind: `image`, `file`, `audio`, ...
    pub kind: String,
}

/// An emoji reaction. At most one reaction per user per message; re-reacting
/// with a different emoji replaces it, re-reacting with the same emoji
/// removes it (toggle semantics).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

/// Provenance carried by a forwarded message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardInfo {
    pub original_sender: Uuid,
    pub original_chat: Uuid,
}

// ---------------------------------------------------------------------------
// Delivery status
// ---------------------------------------------------------------------------

/// Lifecycle of a message's delivery: `sent` until at least one recipient
/// was reachable, `delivered` once emitted to a live session, `seen` once
/// any recipient marked the chat read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Seen => "seen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "seen" => Some(DeliveryStatus::Seen),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message.
///
/// Never physically deleted except via full-conversation deletion; deletion
/// is expressed through `deleted_for` (per-viewer soft delete) and
/// `deleted_for_everyone` (tombstone for all viewers).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    /// Plaintext body; `None` for attachment-only or end-to-end-encrypted
    /// messages, and for everyone-deleted tombstones.
    pub body: Option<String>,
    /// Opaque end-to-end-encrypted payload. Carried, never interpreted.
    pub encrypted_body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<Uuid>,
    pub forwarded_from: Option<ForwardInfo>,
    pub reactions: Vec<Reaction>,
    pub status: DeliveryStatus,
    pub delivered_to: Vec<Uuid>,
    pub read_by: Vec<Uuid>,
    pub deleted_for: Vec<Uuid>,
    pub deleted_for_everyone: bool,
    pub is_pinned: bool,
    pub pinned_by: Option<Uuid>,
    pub pinned_at: Option<DateTime<Utc>>,
    /// When set, the message is withheld until the release sweeper promotes
    /// it. The presence of the timestamp alone marks the message as
    /// scheduled, matching the sender-side contract.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// `true` for immediate sends; `false` for scheduled messages until the
    /// one-time release transition.
    pub is_released: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A fresh outgoing message with delivery defaults (immediate send).
    pub fn new(chat_id: Uuid, sender_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            body: None,
            encrypted_body: None,
            attachments: Vec::new(),
            reply_to: None,
            forwarded_from: None,
            reactions: Vec::new(),
            status: DeliveryStatus::Sent,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            deleted_for: Vec::new(),
            deleted_for_everyone: false,
            is_pinned: false,
            pinned_by: None,
            pinned_at: None,
            scheduled_at: None,
            is_released: true,
            created_at: Utc::now(),
        }
    }

    /// Visibility predicate: a message is visible to `viewer` iff the viewer
    /// has not soft-deleted it, it is released (or the viewer is the
    /// sender), and it has not been deleted for everyone.
    pub fn visible_to(&self, viewer: Uuid) -> bool {
        !self.deleted_for.contains(&viewer)
            && (self.is_released || viewer == self.sender_id)
            && !self.deleted_for_everyone
    }

    /// Short text used for the conversation preview.
    pub fn preview(&self) -> String {
        match (&self.body, self.attachments.is_empty()) {
            (Some(body), _) if !body.is_empty() => body.clone(),
            (_, false) => "[attachment]".to_string(),
            _ => "[message]".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Audio => "audio",
            CallKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(CallKind::Audio),
            "video" => Some(CallKind::Video),
            _ => None,
        }
    }
}

/// Terminal-or-initial call state: `initiated` transitions exactly once to
/// one of the terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Completed,
    Missed,
    Declined,
    Busy,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Completed => "completed",
            CallStatus::Missed => "missed",
            CallStatus::Declined => "declined",
            CallStatus::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(CallStatus::Initiated),
            "completed" => Some(CallStatus::Completed),
            "missed" => Some(CallStatus::Missed),
            "declined" => Some(CallStatus::Declined),
            "busy" => Some(CallStatus::Busy),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_predicate() {
        let sender = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let mut msg = Message::new(Uuid::new_v4(), sender);

        assert!(msg.visible_to(viewer));

        // Unreleased: only the sender sees it.
        msg.is_released = false;
        assert!(msg.visible_to(sender));
        assert!(!msg.visible_to(viewer));
        msg.is_released = true;

        // Soft-deleted for the viewer only.
        msg.deleted_for.push(viewer);
        assert!(!msg.visible_to(viewer));
        assert!(msg.visible_to(sender));

        // Deleted for everyone hides it from all viewers, sender included.
        msg.deleted_for_everyone = true;
        assert!(!msg.visible_to(sender));
    }

    #[test]
    fn preview_falls_back_to_attachment_marker() {
        let mut msg = Message::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(msg.preview(), "[message]");

        msg.attachments.push(Attachment {
            url: "blob://1".into(),
            kind: "image".into(),
        });
        assert_eq!(msg.preview(), "[attachment]");

        msg.body = Some("hi".into());
        assert_eq!(msg.preview(), "hi");
    }

    #[test]
    fn status_round_trip() {
        for s in ["sent", "delivered", "seen"] {
            assert_eq!(DeliveryStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(DeliveryStatus::parse("bogus").is_none());
    }
}
