//! Message delivery engine.
//!
//! [`submit`] is the single ingress for outgoing messages: it validates
//! membership and blocks, persists, and either withholds (scheduled) or
//! fans out immediately. [`fan_out`] is the single egress shared by
//! immediate sends, forwards, and the release sweeper, so every message
//! reaches recipients through exactly one code path:
//!
//! - participants present in the conversation room get the message live
//!   and are recorded as delivered;
//! - absent participants get an unread increment, a pending-delivery row,
//!   and a best-effort push notification;
//! - the event is emitted both to the conversation room and to each
//!   participant's private room, so clients viewing another conversation
//!   still update their sidebar.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use courier_shared::{Attachment, ForwardInfo, Message, ServerEvent};
use courier_store::StoreError;

use crate::error::{Result, ServerError};
use crate::presence::RoomId;
use crate::state::AppState;

/// Everything a client may set on an outgoing message.
#[derive(Debug, Default)]
pub struct OutgoingMessage {
    pub body: Option<String>,
    pub encrypted_body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<Uuid>,
    pub forwarded_from: Option<ForwardInfo>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Validate, persist, and route one outgoing message.
///
/// A message with any `scheduled_at` value is withheld: persisted
/// unreleased, acknowledged to the sender alone, and invisible to everyone
/// else until the release sweeper claims it. A past timestamp is not
/// special-cased; the next sweeper tick releases it.
pub async fn submit(
    state: &AppState,
    sender_id: Uuid,
    chat_id: Uuid,
    outgoing: OutgoingMessage,
) -> Result<Message> {
    let message = {
        let db = state.db.lock().await;

        let chat = db.get_chat(chat_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::ChatNotFound,
            other => other.into(),
        })?;
        if !db.is_participant(chat_id, sender_id)? {
            return Err(ServerError::NotParticipant);
        }

        // Blocks only gate one-to-one conversations, in both directions,
        // with distinct errors so the client can tell which side blocked.
        if !chat.is_group {
            let members = db.member_ids(chat_id)?;
            if let Some(peer) = members.iter().copied().find(|m| *m != sender_id) {
                if db.has_blocked(sender_id, peer)? {
                    return Err(ServerError::BlockedByYou);
                }
                if db.has_blocked(peer, sender_id)? {
                    return Err(ServerError::BlockedByPeer);
                }
            }
        }

        let mut message = Message::new(chat_id, sender_id);
        message.body = outgoing.body;
        message.encrypted_body = outgoing.encrypted_body;
        message.attachments = outgoing.attachments;
        message.reply_to = outgoing.reply_to;
        message.forwarded_from = outgoing.forwarded_from;
        if let Some(at) = outgoing.scheduled_at {
            message.scheduled_at = Some(at);
            message.is_released = false;
        }
        db.insert_message(&message)?;
        message
    };

    match message.scheduled_at {
        Some(scheduled_at) => {
            debug!(message_id = %message.id, %chat_id, %scheduled_at, "message scheduled");
            state
                .presence
                .send_to_user(
                    sender_id,
                    &ServerEvent::MessageScheduled {
                        message: message.clone(),
                        chat_id,
                        scheduled_at,
                    },
                )
                .await;
        }
        None => fan_out(state, &message).await?,
    }

    Ok(message)
}

/// Fan one persisted, released message out to every participant.
///
/// Bookkeeping is idempotent per message: pending rows are keyed per
/// user and message, and the unread increment only fires when the
/// pending row is newly created, so a repeated invocation leaves the
/// counters unchanged.
pub async fn fan_out(state: &AppState, message: &Message) -> Result<()> {
    let chat_id = message.chat_id;
    let present = state.presence.users_in_room(RoomId::Chat(chat_id)).await;

    let preview = message.preview();
    let (members, delivered, absent) = {
        let db = state.db.lock().await;
        let members = db.member_ids(chat_id)?;

        let mut delivered = Vec::new();
        let mut absent = Vec::new();
        for member in members.iter().copied() {
            if member == message.sender_id {
                continue;
            }
            if present.contains(&member) {
                delivered.push(member);
            } else {
                absent.push(member);
                // The pending row is the dedup key: only its creation
                // earns an unread increment, so replaying a message
                // cannot double count.
                if db.enqueue_pending(member, message.id)? {
                    db.increment_unread(chat_id, member)?;
                }
            }
        }

        if !delivered.is_empty() {
            db.mark_delivered(message.id, &delivered)?;
        }
        db.set_preview(chat_id, &preview, message.created_at)?;
        // A new message resurfaces the conversation for everyone who
        // had hidden or archived it and is around to see that happen.
        let seen: Vec<Uuid> = members
            .iter()
            .copied()
            .filter(|m| *m == message.sender_id || present.contains(m))
            .collect();
        db.unhide_unarchive(chat_id, &seen)?;

        (members, delivered, absent)
    };

    let mut delivered_message = message.clone();
    delivered_message.delivered_to = delivered;
    if !delivered_message.delivered_to.is_empty() {
        delivered_message.status = courier_shared::DeliveryStatus::Delivered;
    }

    let new = ServerEvent::MessageNew {
        message: delivered_message,
    };
    state.presence.send_to_room(RoomId::Chat(chat_id), &new).await;
    for member in &members {
        state.presence.send_to_user(*member, &new).await;
    }
    state
        .presence
        .send_to_room(
            RoomId::Chat(chat_id),
            &ServerEvent::ChatsUpdate {
                chat_id,
                last_message: Some(preview.clone()),
                last_at: Some(message.created_at),
                unread_reset_for: None,
            },
        )
        .await;

    for member in absent {
        if let Err(error) = state.notifier.notify(member, chat_id, &preview) {
            warn!(%member, %chat_id, %error, "push notification failed");
        }
    }

    Ok(())
}

/// Replay every pending delivery for a reconnecting user, then clear the
/// queue. Replay order is unspecified; clients order by timestamp.
pub async fn sync_pending(state: &AppState, user_id: Uuid) -> Result<usize> {
    let messages = {
        let db = state.db.lock().await;
        let ids = db.pending_message_ids(user_id)?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match db.get_message(id) {
                Ok(message) => messages.push(message),
                // The message may have been retained away or deleted since
                // it was queued; skip, the row is cleared below either way.
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        messages
    };

    let count = messages.len();
    for message in messages {
        if !message.visible_to(user_id) {
            continue;
        }
        state
            .presence
            .send_to_user(user_id, &ServerEvent::MessageNew { message })
            .await;
    }

    // Rows are deleted only after replay was attempted; a sync that
    // aborts above leaves the backlog intact for the next connect.
    {
        let db = state.db.lock().await;
        db.clear_pending(user_id)?;
    }
    debug!(%user_id, count, "replayed pending deliveries");
    Ok(count)
}

/// Mark every message in the conversation read by `reader`, zero their
/// unread counter, and tell the room so senders can flip ticks.
pub async fn read_all(state: &AppState, reader: Uuid, chat_id: Uuid) -> Result<()> {
    {
        let db = state.db.lock().await;
        if !db.is_participant(chat_id, reader)? {
            return Err(ServerError::NotParticipant);
        }
        db.mark_read_all(chat_id, reader)?;
        db.reset_unread(chat_id, reader)?;
    }

    state
        .presence
        .send_to_room(
            RoomId::Chat(chat_id),
            &ServerEvent::ReadReceipt { chat_id, reader },
        )
        .await;
    state
        .presence
        .send_to_user(
            reader,
            &ServerEvent::ChatsUpdate {
                chat_id,
                last_message: None,
                last_at: None,
                unread_reset_for: Some(reader),
            },
        )
        .await;
    Ok(())
}
