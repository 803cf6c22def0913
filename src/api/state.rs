//! Application state for the API server.

use crate::db::Database;
use crate::realtime::ChangeNotifier;

/// Shared application state.
///
/// Both fields are cheap handles; cloning the state per request shares the
/// same pool and broadcast channel.
#[derive(Clone, Debug)]
pub struct AppState {
    db: Database,
    notifier: ChangeNotifier,
}

impl AppState {
    pub fn new(db: Database, notifier: ChangeNotifier) -> Self {
        Self { db, notifier }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }
}
