//! The presence registry: the process-local source of truth for "is this
//! user connected right now, and through which sessions".
//!
//! Maintains a bidirectional session/user mapping with multi-device
//! support, plus room membership: every session joins the rooms of all
//! chats its user participates in and a private per-user room. The
//! delivery engine consults [`PresenceRegistry::users_in_room`] to decide
//! delivered-vs-pending; the call relay uses
//! [`PresenceRegistry::find_any_session`] for direct addressing.
//!
//! All state is in-process behind the registry interface, so a
//! multi-instance deployment can swap in a shared presence store without
//! touching callers. A single presence authority is assumed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use courier_shared::ServerEvent;

/// Identifier of one connected WebSocket session.
pub type SessionId = Uuid;

/// Rooms a session can be joined to: one per chat, plus a private per-user
/// room used for cross-conversation delivery (unread badges, sidebar
/// updates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Chat(Uuid),
    User(Uuid),
}

struct Session {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    user_sessions: HashMap<Uuid, HashSet<SessionId>>,
    rooms: HashMap<RoomId, HashSet<SessionId>>,
}

impl Inner {
    fn join(&mut self, room: RoomId, session_id: SessionId) {
        self.rooms.entry(room).or_default().insert(session_id);
    }

    fn leave(&mut self, room: RoomId, session_id: SessionId) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&session_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }
}

/// Cheaply cloneable handle to the shared session/user/room maps.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session for a user and join it to every given chat room plus
    /// the user's private room. Returns `true` if this was the user's
    /// first active session (the online transition).
    pub async fn register(
        &self,
        session_id: SessionId,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<ServerEvent>,
        chat_ids: &[Uuid],
    ) -> bool {
        let mut inner = self.inner.lock().await;

        inner.sessions.insert(session_id, Session { user_id, tx });
        let sessions = inner.user_sessions.entry(user_id).or_default();
        sessions.insert(session_id);
        let first = sessions.len() == 1;

        for chat_id in chat_ids {
            inner.join(RoomId::Chat(*chat_id), session_id);
        }
        inner.join(RoomId::User(user_id), session_id);

        first
    }

    /// Remove a session. Returns the session's user id and whether this
    /// was the user's last session (the offline transition).
    pub async fn unregister(&self, session_id: SessionId) -> Option<(Uuid, bool)> {
        let mut inner = self.inner.lock().await;

        let session = inner.sessions.remove(&session_id)?;
        let user_id = session.user_id;

        let went_offline = if let Some(sessions) = inner.user_sessions.get_mut(&user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                inner.user_sessions.remove(&user_id);
                true
            } else {
                false
            }
        } else {
            true
        };

        let rooms: Vec<RoomId> = inner.rooms.keys().copied().collect();
        for room in rooms {
            inner.leave(room, session_id);
        }

        Some((user_id, went_offline))
    }

    /// Join all of a user's active sessions to a room. Used when the user
    /// gains membership in a chat while connected.
    pub async fn join_user(&self, user_id: Uuid, room: RoomId) {
        let mut inner = self.inner.lock().await;
        let sessions: Vec<SessionId> = inner
            .user_sessions
            .get(&user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for session_id in sessions {
            inner.join(room, session_id);
        }
    }

    /// Remove all of a user's sessions from a room.
    pub async fn leave_user(&self, user_id: Uuid, room: RoomId) {
        let mut inner = self.inner.lock().await;
        let sessions: Vec<SessionId> = inner
            .user_sessions
            .get(&user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for session_id in sessions {
            inner.leave(room, session_id);
        }
    }

    /// True iff any of the user's active sessions is joined to the room.
    pub async fn is_present_in_room(&self, room: RoomId, user_id: Uuid) -> bool {
        let inner = self.inner.lock().await;
        match inner.rooms.get(&room) {
            Some(members) => members
                .iter()
                .any(|sid| inner.sessions.get(sid).map(|s| s.user_id) == Some(user_id)),
            None => false,
        }
    }

    /// The set of distinct users with at least one session in the room.
    pub async fn users_in_room(&self, room: RoomId) -> HashSet<Uuid> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(&room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|sid| inner.sessions.get(sid).map(|s| s.user_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One active session handle for direct addressing; `None` when the
    /// user is offline.
    pub async fn find_any_session(
        &self,
        user_id: Uuid,
    ) -> Option<mpsc::UnboundedSender<ServerEvent>> {
        let inner = self.inner.lock().await;
        let sessions = inner.user_sessions.get(&user_id)?;
        sessions
            .iter()
            .find_map(|sid| inner.sessions.get(sid).map(|s| s.tx.clone()))
    }

    pub async fn send_to_room(&self, room: RoomId, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        if let Some(members) = inner.rooms.get(&room) {
            for sid in members {
                if let Some(session) = inner.sessions.get(sid) {
                    let _ = session.tx.send(event.clone());
                }
            }
        }
    }

    /// Emit to the room, skipping one user's sessions (typing indicators).
    pub async fn send_to_room_except(&self, room: RoomId, except: Uuid, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        if let Some(members) = inner.rooms.get(&room) {
            for sid in members {
                if let Some(session) = inner.sessions.get(sid) {
                    if session.user_id != except {
                        let _ = session.tx.send(event.clone());
                    }
                }
            }
        }
    }

    /// Emit to every session of one user (their private room).
    pub async fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) {
        self.send_to_room(RoomId::User(user_id), event).await;
    }

    /// Emit to every connected session.
    pub async fn broadcast(&self, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        for session in inner.sessions.values() {
            let _ = session.tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (SessionId, mpsc::UnboundedSender<ServerEvent>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Uuid::new_v4(), tx, rx)
    }

    #[tokio::test]
    async fn first_and_last_session_transitions() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (s1, tx1, _rx1) = session();
        let (s2, tx2, _rx2) = session();

        assert!(registry.register(s1, user, tx1, &[]).await);
        // Second device: not a transition.
        assert!(!registry.register(s2, user, tx2, &[]).await);

        assert_eq!(registry.unregister(s1).await, Some((user, false)));
        assert_eq!(registry.unregister(s2).await, Some((user, true)));
        assert_eq!(registry.unregister(s2).await, None);
    }

    #[tokio::test]
    async fn room_presence_tracks_any_session() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let (s1, tx1, _rx1) = session();

        registry.register(s1, user, tx1, &[chat]).await;
        assert!(registry.is_present_in_room(RoomId::Chat(chat), user).await);
        assert!(registry.is_present_in_room(RoomId::User(user), user).await);

        registry.unregister(s1).await;
        assert!(!registry.is_present_in_room(RoomId::Chat(chat), user).await);
        assert!(registry.users_in_room(RoomId::Chat(chat)).await.is_empty());
    }

    #[tokio::test]
    async fn users_in_room_deduplicates_devices() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let (s1, tx1, _rx1) = session();
        let (s2, tx2, _rx2) = session();

        registry.register(s1, user, tx1, &[chat]).await;
        registry.register(s2, user, tx2, &[chat]).await;

        let users = registry.users_in_room(RoomId::Chat(chat)).await;
        assert_eq!(users.len(), 1);
        assert!(users.contains(&user));
    }

    #[tokio::test]
    async fn find_any_session_none_when_offline() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        assert!(registry.find_any_session(user).await.is_none());

        let (s1, tx1, mut rx1) = session();
        registry.register(s1, user, tx1, &[]).await;

        let tx = registry.find_any_session(user).await.expect("online");
        tx.send(ServerEvent::PresenceUpdate {
            user_id: user,
            is_online: true,
        })
        .unwrap();
        assert!(rx1.recv().await.is_some());
    }

    #[tokio::test]
    async fn send_to_room_except_skips_sender() {
        let registry = PresenceRegistry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let (sa, txa, mut rxa) = session();
        let (sb, txb, mut rxb) = session();

        registry.register(sa, alice, txa, &[chat]).await;
        registry.register(sb, bob, txb, &[chat]).await;

        let event = ServerEvent::TypingStarted {
            chat_id: chat,
            user_id: alice,
        };
        registry
            .send_to_room_except(RoomId::Chat(chat), alice, &event)
            .await;

        assert!(rxb.try_recv().is_ok());
        assert!(rxa.try_recv().is_err());
    }
}
