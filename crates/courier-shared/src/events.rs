//! WebSocket wire protocol.
//!
//! Frames are JSON objects of the shape `{"event": "...", "data": {...}}`,
//! modeled as adjacently tagged enums. [`ClientEvent`] is everything a
//! client may send after the connection handshake; [`ServerEvent`] is
//! everything the server emits to rooms, private user rooms, or broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Attachment, CallKind, Message, Reaction};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "message:send")]
    MessageSend {
        chat_id: Uuid,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        encrypted_body: Option<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
        #[serde(default)]
        reply_to: Option<Uuid>,
        /// Any value here marks the message as scheduled and withholds it
        /// until the release sweeper fires, even a past timestamp.
        #[serde(default)]
        scheduled_at: Option<DateTime<Utc>>,
    },

    #[serde(rename = "message:readAll")]
    MessageReadAll { chat_id: Uuid },

    #[serde(rename = "message:delete")]
    MessageDelete {
        message_id: Uuid,
        #[serde(default)]
        for_everyone: bool,
    },

    #[serde(rename = "message:react")]
    MessageReact { message_id: Uuid, emoji: String },

    #[serde(rename = "message:pin")]
    MessagePin { message_id: Uuid, chat_id: Uuid },

    #[serde(rename = "message:unpin")]
    MessageUnpin { message_id: Uuid, chat_id: Uuid },

    #[serde(rename = "message:forward")]
    MessageForward {
        message_id: Uuid,
        target_chat_id: Uuid,
    },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { chat_id: Uuid },

    #[serde(rename = "chat:pin")]
    ChatPin { chat_id: Uuid },

    #[serde(rename = "chat:unpin")]
    ChatUnpin { chat_id: Uuid },

    #[serde(rename = "chat:archive")]
    ChatArchive { chat_id: Uuid, archive: bool },

    /// Wipe the caller's view of the conversation history up to now.
    #[serde(rename = "chat:clear")]
    ChatClear { chat_id: Uuid },

    #[serde(rename = "group:create")]
    GroupCreate {
        title: String,
        #[serde(default)]
        description: Option<String>,
        participants: Vec<Uuid>,
    },

    #[serde(rename = "group:add")]
    GroupAdd { chat_id: Uuid, member_id: Uuid },

    #[serde(rename = "group:remove")]
    GroupRemove { chat_id: Uuid, member_id: Uuid },

    #[serde(rename = "group:promote")]
    GroupPromote { chat_id: Uuid, member_id: Uuid },

    #[serde(rename = "group:leave")]
    GroupLeave { chat_id: Uuid },

    #[serde(rename = "user:block")]
    UserBlock { target_user_id: Uuid },

    #[serde(rename = "user:unblock")]
    UserUnblock { target_user_id: Uuid },

    /// Replay every pending delivery for this user, then clear the queue.
    #[serde(rename = "user:sync")]
    UserSync,

    #[serde(rename = "call:initiate")]
    CallInitiate {
        target_user_id: Uuid,
        call_type: CallKind,
    },

    #[serde(rename = "call:accept")]
    CallAccept { call_id: Uuid, caller_id: Uuid },

    #[serde(rename = "call:reject")]
    CallReject { call_id: Uuid, caller_id: Uuid },

    #[serde(rename = "call:offer")]
    CallOffer {
        target_user_id: Uuid,
        offer: serde_json::Value,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        target_user_id: Uuid,
        answer: serde_json::Value,
    },

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        target_user_id: Uuid,
        candidate: serde_json::Value,
    },

    #[serde(rename = "call:end")]
    CallEnd {
        call_id: Uuid,
        target_user_id: Uuid,
    },
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Emitted to the conversation room and to every participant's private
    /// user room (dual delivery).
    #[serde(rename = "message:new")]
    MessageNew { message: Message },

    /// Sent to the scheduling sender only; no one else sees anything until
    /// release.
    #[serde(rename = "message:scheduled")]
    MessageScheduled {
        message: Message,
        chat_id: Uuid,
        scheduled_at: DateTime<Utc>,
    },

    /// Terminal error for a rejected client action, with a stable `code`
    /// so clients can distinguish "blocked" from "not a participant" from
    /// "server error".
    #[serde(rename = "message:error")]
    Error { code: String, error: String },

    #[serde(rename = "chats:update")]
    ChatsUpdate {
        chat_id: Uuid,
        #[serde(default)]
        last_message: Option<String>,
        #[serde(default)]
        last_at: Option<DateTime<Utc>>,
        #[serde(default)]
        unread_reset_for: Option<Uuid>,
    },

    #[serde(rename = "message:readReceipt")]
    ReadReceipt { chat_id: Uuid, reader: Uuid },

    #[serde(rename = "message:deleted:everyone")]
    MessageDeletedEveryone { message_id: Uuid, chat_id: Uuid },

    #[serde(rename = "message:deleted:me")]
    MessageDeletedMe { message_id: Uuid, chat_id: Uuid },

    #[serde(rename = "message:reacted")]
    MessageReacted {
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },

    #[serde(rename = "message:pinned")]
    MessagePinned { chat_id: Uuid, message: Message },

    #[serde(rename = "message:unpinned")]
    MessageUnpinned { chat_id: Uuid, message_id: Uuid },

    #[serde(rename = "chat:pinned")]
    ChatPinned { chat_id: Uuid },

    #[serde(rename = "chat:unpinned")]
    ChatUnpinned { chat_id: Uuid },

    #[serde(rename = "chat:cleared")]
    ChatCleared { chat_id: Uuid },

    #[serde(rename = "typing:started")]
    TypingStarted { chat_id: Uuid, user_id: Uuid },

    #[serde(rename = "typing:stopped")]
    TypingStopped { chat_id: Uuid, user_id: Uuid },

    #[serde(rename = "group:created")]
    GroupCreated { chat_id: Uuid },

    #[serde(rename = "group:updated")]
    GroupUpdated { chat_id: Uuid },

    #[serde(rename = "presence:update")]
    PresenceUpdate { user_id: Uuid, is_online: bool },

    #[serde(rename = "user:blocked")]
    UserBlocked { target_user_id: Uuid },

    #[serde(rename = "user:unblocked")]
    UserUnblocked { target_user_id: Uuid },

    #[serde(rename = "user:blockedBy")]
    UserBlockedBy { blocked_by: Uuid },

    #[serde(rename = "user:unblockedBy")]
    UserUnblockedBy { unblocked_by: Uuid },

    #[serde(rename = "call:incoming")]
    CallIncoming {
        call_id: Uuid,
        caller_id: Uuid,
        call_type: CallKind,
    },

    #[serde(rename = "call:accepted")]
    CallAccepted { call_id: Uuid, recipient_id: Uuid },

    #[serde(rename = "call:rejected")]
    CallRejected { call_id: Uuid, recipient_id: Uuid },

    #[serde(rename = "call:offer")]
    CallOffer {
        caller_id: Uuid,
        offer: serde_json::Value,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        recipient_id: Uuid,
        answer: serde_json::Value,
    },

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        sender_id: Uuid,
        candidate: serde_json::Value,
    },

    #[serde(rename = "call:ended")]
    CallEnded { call_id: Uuid, ended_by: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_round_trip() {
        let event = ClientEvent::MessageReact {
            message_id: Uuid::new_v4(),
            emoji: "👍".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"message:react\""));

        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn send_defaults_are_optional() {
        let json = r#"{"event":"message:send","data":{"chat_id":"6c9d64c0-0000-0000-0000-000000000001","body":"hi"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::MessageSend {
                body,
                scheduled_at,
                attachments,
                ..
            } => {
                assert_eq!(body.as_deref(), Some("hi"));
                assert!(scheduled_at.is_none());
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unit_variant_without_data() {
        let json = r#"{"event":"user:sync"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, ClientEvent::UserSync);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let json = r#"{"event":"message:readAll","data":{"chat_id":"not-a-uuid"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }
}
