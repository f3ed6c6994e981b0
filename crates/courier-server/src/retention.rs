//! Retention sweeper.
//!
//! Users may opt in to auto-deleting their view of old messages. The
//! sweep hides, for each opted-in user, every message older than their
//! window across all their conversations. Hiding is per-user soft
//! deletion: other participants' views are untouched, and re-running a
//! sweep over the same rows is a no-op.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{error, info};

use crate::error::Result;
use crate::state::AppState;

/// Spawn the retention loop: one sweep at startup, then one per interval.
pub fn spawn_retention_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.retention_interval_secs);
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "retention sweeper started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match run_retention_cycle(&state).await {
                Ok(0) => {}
                Ok(hidden) => info!(hidden, "retention sweep hid messages"),
                Err(e) => error!(error = %e, "retention cycle failed"),
            }
        }
    })
}

/// One sweep over every opted-in user. Per-user errors are logged and
/// skipped so one bad account cannot stall the rest.
pub async fn run_retention_cycle(state: &AppState) -> Result<usize> {
    let users = {
        let db = state.db.lock().await;
        db.users_with_retention()?
    };

    let now = Utc::now();
    let mut total = 0;
    for (user_id, days) in users {
        let cutoff = now - ChronoDuration::days(i64::from(days));
        let db = state.db.lock().await;
        match db.apply_retention(user_id, cutoff) {
            Ok(hidden) => total += hidden,
            Err(e) => error!(%user_id, error = %e, "retention failed for user"),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::delivery::tests::TestHarness;
    use crate::delivery::{submit, OutgoingMessage};

    fn text(body: &str) -> OutgoingMessage {
        OutgoingMessage {
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retention_hides_old_messages_for_opted_in_user_only() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _rx = h.connect(alice, &[chat]).await;

        let message = submit(&h.state, alice, chat, text("old")).await.unwrap();
        {
            let db = h.state.db.lock().await;
            // Backdate the message past any retention window.
            db.conn()
                .execute(
                    "UPDATE messages SET created_at = ?1 WHERE id = ?2",
                    rusqlite::params![
                        (Utc::now() - ChronoDuration::days(60)).to_rfc3339(),
                        message.id.to_string()
                    ],
                )
                .unwrap();
            db.set_retention_days(bob, 30).unwrap();
        }

        let hidden = run_retention_cycle(&h.state).await.unwrap();
        assert_eq!(hidden, 1);

        let db = h.state.db.lock().await;
        assert!(db.messages_for_chat(chat, bob, 50, 0).unwrap().is_empty());
        // Alice never opted in; her view is intact.
        assert_eq!(db.messages_for_chat(chat, alice, 50, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retention_is_idempotent() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _rx = h.connect(alice, &[chat]).await;

        let message = submit(&h.state, alice, chat, text("old")).await.unwrap();
        {
            let db = h.state.db.lock().await;
            db.conn()
                .execute(
                    "UPDATE messages SET created_at = ?1 WHERE id = ?2",
                    rusqlite::params![
                        (Utc::now() - ChronoDuration::days(60)).to_rfc3339(),
                        message.id.to_string()
                    ],
                )
                .unwrap();
            db.set_retention_days(bob, 30).unwrap();
        }

        assert_eq!(run_retention_cycle(&h.state).await.unwrap(), 1);
        assert_eq!(run_retention_cycle(&h.state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_messages_survive_the_window() {
        let h = TestHarness::new().await;
        let alice = h.add_user().await;
        let bob = h.add_user().await;
        let chat = h.direct_chat(alice, bob).await;
        let _rx = h.connect(alice, &[chat]).await;

        submit(&h.state, alice, chat, text("fresh")).await.unwrap();
        {
            let db = h.state.db.lock().await;
            db.set_retention_days(bob, 30).unwrap();
        }

        assert_eq!(run_retention_cycle(&h.state).await.unwrap(), 0);
        let db = h.state.db.lock().await;
        assert_eq!(db.messages_for_chat(chat, bob, 50, 0).unwrap().len(), 1);
    }
}
