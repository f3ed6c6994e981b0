//! Push notification seam.
//!
//! Fan-out calls [`Notifier::notify`] for every participant who was NOT
//! present in the conversation room when a message landed; call signaling
//! uses it for missed rings, where the socket path does not exist. The
//! default implementation only logs; a deployment wires in a real
//! provider by swapping the `Arc<dyn Notifier>` in `AppState`.

use tracing::info;
use uuid::Uuid;

/// Best-effort out-of-band notification for offline recipients. The
/// context id is the conversation for messages and the call record for
/// missed calls. Failures must never affect delivery, so callers log and
/// swallow errors.
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: Uuid, context_id: Uuid, preview: &str) -> anyhow::Result<()>;
}

/// No-op provider that records the notification in the log stream.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_id: Uuid, context_id: Uuid, preview: &str) -> anyhow::Result<()> {
        info!(%user_id, %context_id, preview, "push notification (log only)");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Captures notified users so tests can assert who would have been
    /// pinged out of band.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub notified: Mutex<Vec<Uuid>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, user_id: Uuid, _context_id: Uuid, _preview: &str) -> anyhow::Result<()> {
            self.notified.lock().unwrap().push(user_id);
            Ok(())
        }
    }
}
