//! Message operations beyond the send path: deletes, reactions, pins,
//! forwarding, and conversation-level pin/archive flags.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use courier_shared::{Message, ServerEvent};
use courier_store::StoreError;

use crate::delivery::{self, OutgoingMessage};
use crate::error::{Result, ServerError};
use crate::presence::RoomId;
use crate::state::AppState;

fn map_message_not_found(e: StoreError) -> ServerError {
    match e {
        StoreError::NotFound => ServerError::MessageNotFound,
        other => other.into(),
    }
}

/// Delete a message for the caller only, or for everyone.
///
/// Delete-for-everyone is allowed to the sender, or to a group admin of
/// the conversation; it tombstones the message (content stripped, row
/// kept) so clients can render a placeholder. Delete-for-me only hides
/// the message from the caller's own history.
pub async fn delete_message(
    state: &AppState,
    caller: Uuid,
    message_id: Uuid,
    for_everyone: bool,
) -> Result<()> {
    let (chat_id, everyone) = {
        let db = state.db.lock().await;
        let message = db.get_message(message_id).map_err(map_message_not_found)?;
        if !db.is_participant(message.chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }

        if for_everyone {
            let allowed = message.sender_id == caller
                || (db.get_chat(message.chat_id)?.is_group
                    && db.is_admin(message.chat_id, caller)?);
            if !allowed {
                return Err(ServerError::NotAdmin);
            }
            db.set_deleted_for_everyone(message_id)?;
        } else {
            db.add_deleted_for(message_id, caller)?;
        }
        (message.chat_id, for_everyone)
    };

    if everyone {
        state
            .presence
            .send_to_room(
                RoomId::Chat(chat_id),
                &ServerEvent::MessageDeletedEveryone { message_id, chat_id },
            )
            .await;
    } else {
        state
            .presence
            .send_to_user(caller, &ServerEvent::MessageDeletedMe { message_id, chat_id })
            .await;
    }
    Ok(())
}

/// Toggle the caller's reaction: same emoji removes it, a different emoji
/// replaces it. At most one reaction per user per message. Emits the full
/// updated reaction set so clients never merge incrementally.
pub async fn react(state: &AppState, caller: Uuid, message_id: Uuid, emoji: &str) -> Result<()> {
    let (chat_id, reactions) = {
        let db = state.db.lock().await;
        let message = db.get_message(message_id).map_err(map_message_not_found)?;
        if !db.is_participant(message.chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }
        let reactions = db.toggle_reaction(message_id, caller, emoji)?;
        (message.chat_id, reactions)
    };

    state
        .presence
        .send_to_room(
            RoomId::Chat(chat_id),
            &ServerEvent::MessageReacted {
                message_id,
                reactions,
            },
        )
        .await;
    Ok(())
}

/// Pin a message in its conversation. In groups only admins may pin; in
/// one-to-one chats either participant may.
pub async fn pin(state: &AppState, caller: Uuid, chat_id: Uuid, message_id: Uuid) -> Result<()> {
    let message = {
        let db = state.db.lock().await;
        let message = db.get_message(message_id).map_err(map_message_not_found)?;
        if message.chat_id != chat_id {
            return Err(ServerError::BadRequest(
                "message does not belong to this chat".into(),
            ));
        }
        if !db.is_participant(chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }
        if db.get_chat(chat_id)?.is_group && !db.is_admin(chat_id, caller)? {
            return Err(ServerError::NotAdmin);
        }
        db.pin_message(message_id, caller, Utc::now())?;
        db.get_message(message_id)?
    };

    state
        .presence
        .send_to_room(RoomId::Chat(chat_id), &ServerEvent::MessagePinned { chat_id, message })
        .await;
    Ok(())
}

pub async fn unpin(state: &AppState, caller: Uuid, chat_id: Uuid, message_id: Uuid) -> Result<()> {
    {
        let db = state.db.lock().await;
        if !db.is_participant(chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }
        if db.get_chat(chat_id)?.is_group && !db.is_admin(chat_id, caller)? {
            return Err(ServerError::NotAdmin);
        }
        db.unpin_message(message_id)?;
    }

    state
        .presence
        .send_to_room(
            RoomId::Chat(chat_id),
            &ServerEvent::MessageUnpinned { chat_id, message_id },
        )
        .await;
    Ok(())
}

/// Forward a message into another conversation the caller belongs to.
///
/// The copy is a fresh message from the caller carrying provenance
/// (original sender and conversation) and routes through the normal
/// delivery engine, so unread counters and pending rows apply like any
/// other send.
pub async fn forward(
    state: &AppState,
    caller: Uuid,
    message_id: Uuid,
    target_chat_id: Uuid,
) -> Result<Message> {
    let original = {
        let db = state.db.lock().await;
        let original = db.get_message(message_id).map_err(map_message_not_found)?;
        if !db.is_participant(original.chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }
        if !original.visible_to(caller) {
            return Err(ServerError::MessageNotFound);
        }
        original
    };

    let outgoing = OutgoingMessage {
        body: original.body.clone(),
        encrypted_body: original.encrypted_body.clone(),
        attachments: original.attachments.clone(),
        forwarded_from: Some(courier_shared::ForwardInfo {
            original_sender: original.sender_id,
            original_chat: original.chat_id,
        }),
        ..Default::default()
    };

    let forwarded = delivery::submit(state, caller, target_chat_id, outgoing).await?;
    debug!(original = %message_id, copy = %forwarded.id, %target_chat_id, "message forwarded");
    Ok(forwarded)
}

/// Per-user conversation flags (pinned list, archive shelf).
pub async fn set_chat_pinned(
    state: &AppState,
    caller: Uuid,
    chat_id: Uuid,
    pinned: bool,
) -> Result<()> {
    {
        let db = state.db.lock().await;
        if !db.is_participant(chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }
        db.set_chat_pinned(chat_id, caller, pinned)?;
    }
    let event = if pinned {
        ServerEvent::ChatPinned { chat_id }
    } else {
        ServerEvent::ChatUnpinned { chat_id }
    };
    state.presence.send_to_user(caller, &event).await;
    Ok(())
}

pub async fn set_chat_archived(
    state: &AppState,
    caller: Uuid,
    chat_id: Uuid,
    archived: bool,
) -> Result<()> {
    let db = state.db.lock().await;
    if !db.is_participant(chat_id, caller)? {
        return Err(ServerError::NotParticipant);
    }
    db.set_chat_archived(chat_id, caller, archived)?;
    Ok(())
}

/// Wipe the caller's view of the history: everything at or before the
/// clear point disappears for them alone, and their unread counter goes
/// back to zero. Messages arriving afterwards show up normally.
pub async fn clear_chat(state: &AppState, caller: Uuid, chat_id: Uuid) -> Result<()> {
    {
        let db = state.db.lock().await;
        if !db.is_participant(chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }
        db.set_cleared_at(chat_id, caller, Utc::now())?;
        db.reset_unread(chat_id, caller)?;
    }
    state
        .presence
        .send_to_user(caller, &ServerEvent::ChatCleared { chat_id })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::TestHarness;
    use crate::delivery::submit;

    fn text(body: &str) -> OutgoingMessage {
        OutgoingMessage {
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delete_for_everyone_requires_sender_in_direct_chat() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _rx = h.connect(alice, &[chat]).await;

        let message = submit(&h.state, alice, chat, text("hi")).await.unwrap();

        assert!(matches!(
            delete_message(&h.state, bob, message.id, true).await,
            Err(ServerError::NotAdmin)
        ));
        delete_message(&h.state, alice, message.id, true).await.unwrap();

        let db = h.state.db.lock().await;
        let stored = db.get_message(message.id).unwrap();
        assert!(stored.deleted_for_everyone);
    }

    #[tokio::test]
    async fn delete_for_me_hides_only_for_caller() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _rx = h.connect(alice, &[chat]).await;

        let message = submit(&h.state, alice, chat, text("hi")).await.unwrap();
        delete_message(&h.state, bob, message.id, false).await.unwrap();

        let db = h.state.db.lock().await;
        let for_bob = db.messages_for_chat(chat, bob, 50, 0).unwrap();
        let for_alice = db.messages_for_chat(chat, alice, 50, 0).unwrap();
        assert!(for_bob.is_empty());
        assert_eq!(for_alice.len(), 1);
    }

    #[tokio::test]
    async fn react_emits_full_reaction_set() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _alice_rx = h.connect(alice, &[chat]).await;
        let mut bob_rx = h.connect(bob, &[chat]).await;

        let message = submit(&h.state, alice, chat, text("hi")).await.unwrap();
        while bob_rx.try_recv().is_ok() {}

        react(&h.state, bob, message.id, "👍").await.unwrap();
        match bob_rx.try_recv().unwrap() {
            ServerEvent::MessageReacted { reactions, .. } => {
                assert_eq!(reactions.len(), 1);
                assert_eq!(reactions[0].emoji, "👍");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Same emoji again removes it.
        react(&h.state, bob, message.id, "👍").await.unwrap();
        match bob_rx.try_recv().unwrap() {
            ServerEvent::MessageReacted { reactions, .. } => assert!(reactions.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn forward_carries_provenance_and_routes_delivery() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let carol = h.add_user().await;
        let chat_ab = h.direct_chat(alice, bob).await;
        let chat_bc = h.direct_chat(bob, carol).await;
        let _rx = h.connect(alice, &[chat_ab]).await;
        let _bob_rx = h.connect(bob, &[chat_ab, chat_bc]).await;

        let original = submit(&h.state, alice, chat_ab, text("psst")).await.unwrap();
        let copy = forward(&h.state, bob, original.id, chat_bc).await.unwrap();

        assert_eq!(copy.sender_id, bob);
        assert_eq!(copy.body.as_deref(), Some("psst"));
        let info = copy.forwarded_from.unwrap();
        assert_eq!(info.original_sender, alice);
        assert_eq!(info.original_chat, chat_ab);

        // Carol was offline: the forward counted against her unread.
        let db = h.state.db.lock().await;
        assert_eq!(db.unread_count(chat_bc, carol).unwrap(), 1);
        assert_eq!(db.pending_message_ids(carol).unwrap(), vec![copy.id]);
    }

    #[tokio::test]
    async fn clear_hides_history_for_caller_only() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _rx = h.connect(alice, &[chat]).await;

        submit(&h.state, alice, chat, text("before")).await.unwrap();
        clear_chat(&h.state, bob, chat).await.unwrap();

        {
            let db = h.state.db.lock().await;
            assert!(db.messages_for_chat(chat, bob, 50, 0).unwrap().is_empty());
            assert_eq!(db.messages_for_chat(chat, alice, 50, 0).unwrap().len(), 1);
            assert_eq!(db.unread_count(chat, bob).unwrap(), 0);
        }

        // New traffic lands after the clear point.
        submit(&h.state, alice, chat, text("after")).await.unwrap();
        let db = h.state.db.lock().await;
        let visible = db.messages_for_chat(chat, bob, 50, 0).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].body.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn pin_in_direct_chat_allows_either_participant() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _rx = h.connect(alice, &[chat]).await;

        let message = submit(&h.state, alice, chat, text("hi")).await.unwrap();
        pin(&h.state, bob, chat, message.id).await.unwrap();

        let db = h.state.db.lock().await;
        let stored = db.get_message(message.id).unwrap();
        assert!(stored.is_pinned);
        assert_eq!(stored.pinned_by, Some(bob));
    }
}
