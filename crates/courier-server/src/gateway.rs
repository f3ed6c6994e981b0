//! WebSocket gateway: the connection lifecycle and the event dispatcher.
//!
//! `GET /ws?user_id=<uuid>` upgrades to a socket carrying JSON frames of
//! [`ClientEvent`] / [`ServerEvent`]. Each connection gets a session in
//! the presence registry joined to all of the user's conversation rooms;
//! a writer task drains the session's channel into the socket while the
//! read loop dispatches incoming events. Rejected actions come back as
//! `message:error` frames on the same socket; the connection stays up.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_shared::{ClientEvent, ServerEvent};
use courier_store::StoreError;

use crate::delivery::{self, OutgoingMessage};
use crate::error::{Result, ServerError};
use crate::presence::RoomId;
use crate::state::AppState;
use crate::{calls, groups, messages};

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: Uuid,
}

/// Connection handshake. Fails closed: unknown or disabled accounts never
/// reach the socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> std::result::Result<Response, ServerError> {
    let user_id = params.user_id;
    authorize_connection(&state, user_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, user_id)))
}

async fn authorize_connection(state: &AppState, user_id: Uuid) -> Result<()> {
    let db = state.db.lock().await;
    db.get_user(user_id).map_err(|e| match e {
        StoreError::NotFound => ServerError::UserNotFound,
        other => other.into(),
    })?;
    if db.is_disabled(user_id)? {
        return Err(ServerError::AccountDisabled);
    }
    Ok(())
}

async fn handle_socket(state: AppState, socket: WebSocket, user_id: Uuid) {
    let session_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let chat_ids = {
        let db = state.db.lock().await;
        match db.chat_ids_for_user(user_id) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(%user_id, error = %e, "failed to load chats for connection");
                return;
            }
        }
    };

    let came_online = state
        .presence
        .register(session_id, user_id, tx.clone(), &chat_ids)
        .await;
    info!(%user_id, %session_id, chats = chat_ids.len(), came_online, "session connected");

    if came_online {
        {
            let db = state.db.lock().await;
            if let Err(e) = db.set_presence(user_id, true, Utc::now()) {
                warn!(%user_id, error = %e, "failed to persist online presence");
            }
        }
        state
            .presence
            .broadcast(&ServerEvent::PresenceUpdate {
                user_id,
                is_online: true,
            })
            .await;
    }

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to encode server event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%user_id, error = %e, "socket read error");
                break;
            }
        };
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => continue,
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                let error = ServerError::BadRequest(format!("malformed event: {e}"));
                send_error(&tx, &error);
                continue;
            }
        };

        if let Err(error) = dispatch(&state, user_id, event).await {
            send_error(&tx, &error);
        }
    }

    writer.abort();
    if let Some((_, went_offline)) = state.presence.unregister(session_id).await {
        info!(%user_id, %session_id, went_offline, "session disconnected");
        if went_offline {
            {
                let db = state.db.lock().await;
                if let Err(e) = db.set_presence(user_id, false, Utc::now()) {
                    warn!(%user_id, error = %e, "failed to persist offline presence");
                }
            }
            state
                .presence
                .broadcast(&ServerEvent::PresenceUpdate {
                    user_id,
                    is_online: false,
                })
                .await;
        }
    }
}

fn send_error(tx: &mpsc::UnboundedSender<ServerEvent>, error: &ServerError) {
    let _ = tx.send(ServerEvent::Error {
        code: error.code().to_string(),
        error: match error {
            // Hide internals from clients.
            ServerError::Store(StoreError::NotFound) => "Record not found".to_string(),
            ServerError::Store(_) => "Internal server error".to_string(),
            other => other.to_string(),
        },
    });
}

async fn dispatch(state: &AppState, user_id: Uuid, event: ClientEvent) -> Result<()> {
    match event {
        ClientEvent::MessageSend {
            chat_id,
            body,
            encrypted_body,
            attachments,
            reply_to,
            scheduled_at,
        } => {
            delivery::submit(
                state,
                user_id,
                chat_id,
                OutgoingMessage {
                    body,
                    encrypted_body,
                    attachments,
                    reply_to,
                    forwarded_from: None,
                    scheduled_at,
                },
            )
            .await?;
            Ok(())
        }
        ClientEvent::MessageReadAll { chat_id } => delivery::read_all(state, user_id, chat_id).await,
        ClientEvent::MessageDelete {
            message_id,
            for_everyone,
        } => messages::delete_message(state, user_id, message_id, for_everyone).await,
        ClientEvent::MessageReact { message_id, emoji } => {
            messages::react(state, user_id, message_id, &emoji).await
        }
        ClientEvent::MessagePin { message_id, chat_id } => {
            messages::pin(state, user_id, chat_id, message_id).await
        }
        ClientEvent::MessageUnpin { message_id, chat_id } => {
            messages::unpin(state, user_id, chat_id, message_id).await
        }
        ClientEvent::MessageForward {
            message_id,
            target_chat_id,
        } => {
            messages::forward(state, user_id, message_id, target_chat_id).await?;
            Ok(())
        }

        ClientEvent::TypingStart { chat_id } => {
            typing(state, user_id, chat_id, true).await
        }
        ClientEvent::TypingStop { chat_id } => {
            typing(state, user_id, chat_id, false).await
        }

        ClientEvent::ChatPin { chat_id } => {
            messages::set_chat_pinned(state, user_id, chat_id, true).await
        }
        ClientEvent::ChatUnpin { chat_id } => {
            messages::set_chat_pinned(state, user_id, chat_id, false).await
        }
        ClientEvent::ChatArchive { chat_id, archive } => {
            messages::set_chat_archived(state, user_id, chat_id, archive).await
        }
        ClientEvent::ChatClear { chat_id } => messages::clear_chat(state, user_id, chat_id).await,

        ClientEvent::GroupCreate {
            title,
            description,
            participants,
        } => {
            groups::create_group(state, user_id, title, description, participants).await?;
            Ok(())
        }
        ClientEvent::GroupAdd { chat_id, member_id } => {
            groups::add_member(state, user_id, chat_id, member_id).await
        }
        ClientEvent::GroupRemove { chat_id, member_id } => {
            groups::remove_member(state, user_id, chat_id, member_id).await
        }
        ClientEvent::GroupPromote { chat_id, member_id } => {
            groups::promote_member(state, user_id, chat_id, member_id).await
        }
        ClientEvent::GroupLeave { chat_id } => groups::leave_group(state, user_id, chat_id).await,

        ClientEvent::UserBlock { target_user_id } => block(state, user_id, target_user_id).await,
        ClientEvent::UserUnblock { target_user_id } => {
            unblock(state, user_id, target_user_id).await
        }
        ClientEvent::UserSync => {
            delivery::sync_pending(state, user_id).await?;
            Ok(())
        }

        ClientEvent::CallInitiate {
            target_user_id,
            call_type,
        } => {
            calls::initiate(state, user_id, target_user_id, call_type).await?;
            Ok(())
        }
        ClientEvent::CallAccept { call_id, caller_id } => {
            calls::accept(state, user_id, call_id, caller_id).await
        }
        ClientEvent::CallReject { call_id, caller_id } => {
            calls::reject(state, user_id, call_id, caller_id).await
        }
        ClientEvent::CallEnd {
            call_id,
            target_user_id,
        } => calls::end(state, user_id, call_id, target_user_id).await,
        ClientEvent::CallOffer {
            target_user_id,
            offer,
        } => {
            calls::relay(
                state,
                target_user_id,
                ServerEvent::CallOffer {
                    caller_id: user_id,
                    offer,
                },
            )
            .await;
            Ok(())
        }
        ClientEvent::CallAnswer {
            target_user_id,
            answer,
        } => {
            calls::relay(
                state,
                target_user_id,
                ServerEvent::CallAnswer {
                    recipient_id: user_id,
                    answer,
                },
            )
            .await;
            Ok(())
        }
        ClientEvent::CallIceCandidate {
            target_user_id,
            candidate,
        } => {
            calls::relay(
                state,
                target_user_id,
                ServerEvent::CallIceCandidate {
                    sender_id: user_id,
                    candidate,
                },
            )
            .await;
            Ok(())
        }
    }
}

/// Typing indicators are ephemeral: membership-checked, never persisted,
/// never echoed back to the typist.
async fn typing(state: &AppState, user_id: Uuid, chat_id: Uuid, started: bool) -> Result<()> {
    {
        let db = state.db.lock().await;
        if !db.is_participant(chat_id, user_id)? {
            return Err(ServerError::NotParticipant);
        }
    }
    let event = if started {
        ServerEvent::TypingStarted { chat_id, user_id }
    } else {
        ServerEvent::TypingStopped { chat_id, user_id }
    };
    state
        .presence
        .send_to_room_except(RoomId::Chat(chat_id), user_id, &event)
        .await;
    Ok(())
}

async fn block(state: &AppState, user_id: Uuid, target: Uuid) -> Result<()> {
    {
        let db = state.db.lock().await;
        db.get_user(target).map_err(|e| match e {
            StoreError::NotFound => ServerError::UserNotFound,
            other => other.into(),
        })?;
        db.block_user(user_id, target)?;
    }
    state
        .presence
        .send_to_user(user_id, &ServerEvent::UserBlocked { target_user_id: target })
        .await;
    state
        .presence
        .send_to_user(target, &ServerEvent::UserBlockedBy { blocked_by: user_id })
        .await;
    Ok(())
}

async fn unblock(state: &AppState, user_id: Uuid, target: Uuid) -> Result<()> {
    let removed = {
        let db = state.db.lock().await;
        db.unblock_user(user_id, target)?
    };
    if removed {
        state
            .presence
            .send_to_user(user_id, &ServerEvent::UserUnblocked { target_user_id: target })
            .await;
        state
            .presence
            .send_to_user(target, &ServerEvent::UserUnblockedBy { unblocked_by: user_id })
            .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::TestHarness;

    #[tokio::test]
    async fn handshake_rejects_unknown_and_disabled_accounts() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;

        assert!(matches!(
            authorize_connection(&h.state, Uuid::new_v4()).await,
            Err(ServerError::UserNotFound)
        ));

        {
            let db = h.state.db.lock().await;
            db.set_disabled(alice, true).unwrap();
        }
        assert!(matches!(
            authorize_connection(&h.state, alice).await,
            Err(ServerError::AccountDisabled)
        ));

        {
            let db = h.state.db.lock().await;
            db.set_disabled(alice, false).unwrap();
        }
        assert!(authorize_connection(&h.state, alice).await.is_ok());
    }

    #[tokio::test]
    async fn typing_reaches_room_but_not_typist() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let mut alice_rx = h.connect(alice, &[chat]).await;
        let mut bob_rx = h.connect(bob, &[chat]).await;

        typing(&h.state, alice, chat, true).await.unwrap();

        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::TypingStarted { .. }
        ));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_requires_membership() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let mallory = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;

        assert!(matches!(
            typing(&h.state, mallory, chat, true).await,
            Err(ServerError::NotParticipant)
        ));
    }

    #[tokio::test]
    async fn block_notifies_both_sides() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let mut alice_rx = h.connect(alice, &[]).await;
        let mut bob_rx = h.connect(bob, &[]).await;

        block(&h.state, alice, bob).await.unwrap();

        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::UserBlocked { target_user_id } if target_user_id == bob
        ));
        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::UserBlockedBy { blocked_by } if blocked_by == alice
        ));
    }

    #[tokio::test]
    async fn unblock_of_non_blocked_user_is_silent() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let mut bob_rx = h.connect(bob, &[]).await;

        unblock(&h.state, alice, bob).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }
}
