//! Scheduled-release sweeper.
//!
//! Periodically scans for unreleased messages whose time has come, claims
//! each one, and pushes the claimed ones through the normal fan-out. The
//! claim is a conditional update that flips `is_released` exactly once,
//! so two overlapping cycles (or two instances sharing a database file)
//! can never fan the same message out twice.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::state::AppState;
use crate::{delivery, error::Result};

/// Spawn the sweeper loop. Runs until the process exits.
pub fn spawn_release_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.release_interval_secs);
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "release sweeper started");
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick releases anything past-due at startup.
        loop {
            ticker.tick().await;
            match run_release_cycle(&state).await {
                Ok(0) => {}
                Ok(released) => info!(released, "released scheduled messages"),
                Err(e) => error!(error = %e, "release cycle failed"),
            }
        }
    })
}

/// One sweep: find due messages, claim, fan out. Per-message errors are
/// logged and skipped so one bad row cannot wedge the queue.
pub async fn run_release_cycle(state: &AppState) -> Result<usize> {
    let due = {
        let db = state.db.lock().await;
        db.due_scheduled(Utc::now())?
    };

    let mut released = 0;
    for mut message in due {
        let claimed = {
            let db = state.db.lock().await;
            db.claim_release(message.id)?
        };
        if !claimed {
            // Another cycle or instance got there first.
            debug!(message_id = %message.id, "release already claimed");
            continue;
        }
        message.is_released = true;

        if let Err(e) = delivery::fan_out(state, &message).await {
            error!(message_id = %message.id, error = %e, "fan-out of released message failed");
            continue;
        }
        released += 1;
    }
    Ok(released)
}
