//! Shared application state handed to every handler and background task.

use std::sync::Arc;

use tokio::sync::Mutex;

use courier_store::Database;

use crate::config::ServerConfig;
use crate::presence::PresenceRegistry;
use crate::push::Notifier;

/// Cloneable handle; everything inside is shared.
///
/// The store is synchronous rusqlite behind an async mutex. Handlers hold
/// the lock only for the duration of a statement batch, never across an
/// emit or a network await.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub presence: PresenceRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            presence: PresenceRegistry::new(),
            notifier,
            config: Arc::new(config),
        }
    }
}
