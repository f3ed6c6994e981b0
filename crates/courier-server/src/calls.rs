//! Call signaling relay.
//!
//! The server never inspects SDP or ICE payloads; it only routes them
//! between the two peers and keeps a call record for history. Signaling
//! frames addressed to an offline peer are dropped with a log line —
//! WebRTC renegotiates, messages do not.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_shared::{CallKind, CallStatus, ServerEvent};
use courier_store::{Call, StoreError};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Start a call. The callee must be online; otherwise a `missed` record
/// is written immediately, the callee is push-notified, and the caller
/// gets a `UserOffline` rejection.
pub async fn initiate(
    state: &AppState,
    caller_id: Uuid,
    target_user_id: Uuid,
    call_type: CallKind,
) -> Result<Uuid> {
    let call = Call::initiate(caller_id, target_user_id, call_type);
    {
        let db = state.db.lock().await;
        db.get_user(target_user_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::UserNotFound,
            other => other.into(),
        })?;
        db.create_call(&call)?;
    }

    match state.presence.find_any_session(target_user_id).await {
        Some(tx) => {
            let _ = tx.send(ServerEvent::CallIncoming {
                call_id: call.id,
                caller_id,
                call_type,
            });
            Ok(call.id)
        }
        None => {
            {
                let db = state.db.lock().await;
                db.set_call_status(call.id, CallStatus::Missed)?;
            }
            // A push is the only way an offline callee hears about the
            // missed call.
            if let Err(error) = state.notifier.notify(target_user_id, call.id, "Missed call") {
                warn!(%target_user_id, call_id = %call.id, %error, "push notification failed");
            }
            Err(ServerError::UserOffline)
        }
    }
}

pub async fn accept(state: &AppState, recipient_id: Uuid, call_id: Uuid, caller_id: Uuid) -> Result<()> {
    state
        .presence
        .send_to_user(caller_id, &ServerEvent::CallAccepted { call_id, recipient_id })
        .await;
    Ok(())
}

pub async fn reject(state: &AppState, recipient_id: Uuid, call_id: Uuid, caller_id: Uuid) -> Result<()> {
    {
        let db = state.db.lock().await;
        db.set_call_status(call_id, CallStatus::Declined)?;
    }
    state
        .presence
        .send_to_user(caller_id, &ServerEvent::CallRejected { call_id, recipient_id })
        .await;
    Ok(())
}

/// End an accepted call: record `completed` with the elapsed duration and
/// tell the other side.
pub async fn end(state: &AppState, ended_by: Uuid, call_id: Uuid, target_user_id: Uuid) -> Result<()> {
    {
        let db = state.db.lock().await;
        let call = db.get_call(call_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::BadRequest("unknown call".into()),
            other => other.into(),
        })?;
        let ended_at = Utc::now();
        let duration = (ended_at - call.started_at).num_seconds().max(0) as u64;
        db.end_call(call_id, CallStatus::Completed, duration, ended_at)?;
    }

    state
        .presence
        .send_to_user(target_user_id, &ServerEvent::CallEnded { call_id, ended_by })
        .await;
    Ok(())
}

/// Relay an opaque signaling payload to one peer, dropping it when the
/// peer is offline.
pub async fn relay(state: &AppState, target_user_id: Uuid, event: ServerEvent) {
    match state.presence.find_any_session(target_user_id).await {
        Some(tx) => {
            let _ = tx.send(event);
        }
        None => {
            debug!(%target_user_id, "dropping signaling frame for offline peer");
        }
    }
}
