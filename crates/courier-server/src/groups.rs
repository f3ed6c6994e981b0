//! Group conversation management: creation, membership changes, admin
//! promotion, and the leave path with its succession rules.

use tracing::info;
use uuid::Uuid;

use courier_shared::ServerEvent;
use courier_store::{Chat, RemovalOutcome};

use crate::error::{Result, ServerError};
use crate::presence::RoomId;
use crate::state::AppState;

/// Create a group chat with the caller as its first admin. The caller is
/// always a participant regardless of the submitted list.
pub async fn create_group(
    state: &AppState,
    caller: Uuid,
    title: String,
    description: Option<String>,
    participants: Vec<Uuid>,
) -> Result<Uuid> {
    if title.trim().is_empty() {
        return Err(ServerError::BadRequest("group title is required".into()));
    }

    let mut members = participants;
    if !members.contains(&caller) {
        members.push(caller);
    }

    let chat = Chat::group(title, description);
    {
        let db = state.db.lock().await;
        db.create_chat(&chat, &members, &[caller])?;
    }
    info!(chat_id = %chat.id, %caller, members = members.len(), "group created");

    // Join every connected member's sessions to the new room, then tell
    // them about it through their private rooms.
    for member in &members {
        state.presence.join_user(*member, RoomId::Chat(chat.id)).await;
        state
            .presence
            .send_to_user(*member, &ServerEvent::GroupCreated { chat_id: chat.id })
            .await;
    }
    Ok(chat.id)
}

/// Add a member. Admin-only.
pub async fn add_member(
    state: &AppState,
    caller: Uuid,
    chat_id: Uuid,
    member_id: Uuid,
) -> Result<()> {
    {
        let db = state.db.lock().await;
        require_group_admin(&db, chat_id, caller)?;
        db.get_user(member_id).map_err(|e| match e {
            courier_store::StoreError::NotFound => ServerError::UserNotFound,
            other => other.into(),
        })?;
        db.add_member(chat_id, member_id)?;
    }

    state.presence.join_user(member_id, RoomId::Chat(chat_id)).await;
    notify_group_updated(state, chat_id, Some(member_id)).await;
    Ok(())
}

/// Remove a member. Admin-only, and an admin cannot be removed while they
/// are the group's only admin.
pub async fn remove_member(
    state: &AppState,
    caller: Uuid,
    chat_id: Uuid,
    member_id: Uuid,
) -> Result<()> {
    let outcome = {
        let db = state.db.lock().await;
        require_group_admin(&db, chat_id, caller)?;
        if !db.is_participant(chat_id, member_id)? {
            return Err(ServerError::NotParticipant);
        }
        let admins = db.admin_ids(chat_id)?;
        if admins == [member_id] {
            return Err(ServerError::OnlyAdmin);
        }
        db.remove_member(chat_id, member_id)?
    };

    state.presence.leave_user(member_id, RoomId::Chat(chat_id)).await;
    if outcome != RemovalOutcome::ChatDeleted {
        notify_group_updated(state, chat_id, Some(member_id)).await;
    }
    Ok(())
}

/// Grant admin rights to an existing member. Admin-only.
pub async fn promote_member(
    state: &AppState,
    caller: Uuid,
    chat_id: Uuid,
    member_id: Uuid,
) -> Result<()> {
    {
        let db = state.db.lock().await;
        require_group_admin(&db, chat_id, caller)?;
        if !db.is_participant(chat_id, member_id)? {
            return Err(ServerError::NotParticipant);
        }
        db.set_admin(chat_id, member_id, true)?;
    }
    notify_group_updated(state, chat_id, None).await;
    Ok(())
}

/// Leave a group voluntarily.
///
/// If the leaver was the last admin, the earliest-joined remaining member
/// is promoted so the group never ends up adminless. An emptied group is
/// deleted together with its messages.
pub async fn leave_group(state: &AppState, caller: Uuid, chat_id: Uuid) -> Result<()> {
    let outcome = {
        let db = state.db.lock().await;
        let chat = db.get_chat(chat_id).map_err(|e| match e {
            courier_store::StoreError::NotFound => ServerError::ChatNotFound,
            other => other.into(),
        })?;
        if !chat.is_group {
            return Err(ServerError::BadRequest("not a group chat".into()));
        }
        if !db.is_participant(chat_id, caller)? {
            return Err(ServerError::NotParticipant);
        }
        db.remove_member(chat_id, caller)?
    };

    state.presence.leave_user(caller, RoomId::Chat(chat_id)).await;
    match outcome {
        RemovalOutcome::ChatDeleted => {
            info!(%chat_id, "group deleted after last member left");
        }
        _ => notify_group_updated(state, chat_id, Some(caller)).await,
    }
    Ok(())
}

fn require_group_admin(db: &courier_store::Database, chat_id: Uuid, caller: Uuid) -> Result<()> {
    let chat = db.get_chat(chat_id).map_err(|e| match e {
        courier_store::StoreError::NotFound => ServerError::ChatNotFound,
        other => other.into(),
    })?;
    if !chat.is_group {
        return Err(ServerError::BadRequest("not a group chat".into()));
    }
    if !db.is_admin(chat_id, caller)? {
        return Err(ServerError::NotAdmin);
    }
    Ok(())
}

/// Emitted to the room and to the affected user's private room, since a
/// removed user no longer receives room traffic.
async fn notify_group_updated(state: &AppState, chat_id: Uuid, also_user: Option<Uuid>) {
    let event = ServerEvent::GroupUpdated { chat_id };
    state.presence.send_to_room(RoomId::Chat(chat_id), &event).await;
    if let Some(user_id) = also_user {
        state.presence.send_to_user(user_id, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::TestHarness;

    #[tokio::test]
    async fn creator_becomes_admin_and_everyone_joins() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let mut bob_rx = h.connect(bob, &[]).await;

        let chat_id = create_group(&h.state, alice, "team".into(), None, vec![bob])
            .await
            .unwrap();

        {
            let db = h.state.db.lock().await;
            assert!(db.is_admin(chat_id, alice).unwrap());
            assert!(!db.is_admin(chat_id, bob).unwrap());
            let mut members = db.member_ids(chat_id).unwrap();
            members.sort();
            let mut expected = vec![alice, bob];
            expected.sort();
            assert_eq!(members, expected);
        }

        // Bob's live session was joined to the room and told about it.
        assert!(
            h.state
                .presence
                .is_present_in_room(RoomId::Chat(chat_id), bob)
                .await
        );
        match bob_rx.try_recv().unwrap() {
            ServerEvent::GroupCreated { chat_id: id } => assert_eq!(id, chat_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_manage_membership() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let carol = h.add_user().await;
        let chat_id = create_group(&h.state, alice, "team".into(), None, vec![bob])
            .await
            .unwrap();

        assert!(matches!(
            add_member(&h.state, bob, chat_id, carol).await,
            Err(ServerError::NotAdmin)
        ));
        assert!(matches!(
            remove_member(&h.state, bob, chat_id, alice).await,
            Err(ServerError::NotAdmin)
        ));
    }

    #[tokio::test]
    async fn only_admin_cannot_be_removed() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat_id = create_group(&h.state, alice, "team".into(), None, vec![bob])
            .await
            .unwrap();

        // Alice is the only admin; even she cannot remove herself.
        assert!(matches!(
            remove_member(&h.state, alice, chat_id, alice).await,
            Err(ServerError::OnlyAdmin)
        ));

        // With a second admin the removal goes through.
        promote_member(&h.state, alice, chat_id, bob).await.unwrap();
        remove_member(&h.state, bob, chat_id, alice).await.unwrap();

        let db = h.state.db.lock().await;
        assert!(!db.is_participant(chat_id, alice).unwrap());
    }

    #[tokio::test]
    async fn last_admin_leaving_promotes_successor() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let carol = h.add_user().await;
        let chat_id = create_group(&h.state, alice, "team".into(), None, vec![bob, carol])
            .await
            .unwrap();

        leave_group(&h.state, alice, chat_id).await.unwrap();

        let db = h.state.db.lock().await;
        let admins = db.admin_ids(chat_id).unwrap();
        assert_eq!(admins.len(), 1);
        assert!(admins[0] == bob || admins[0] == carol);
    }

    #[tokio::test]
    async fn last_member_leaving_deletes_group() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat_id = create_group(&h.state, alice, "team".into(), None, vec![bob])
            .await
            .unwrap();

        leave_group(&h.state, bob, chat_id).await.unwrap();
        leave_group(&h.state, alice, chat_id).await.unwrap();

        let db = h.state.db.lock().await;
        assert!(matches!(
            db.get_chat(chat_id),
            Err(courier_store::StoreError::NotFound)
        ));
    }
}
