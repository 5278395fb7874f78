use std::sync::Arc;
use std::time::Instant;

use sea_orm::DatabaseConnection;

use crate::config::SessionConfig;
use crate::ledger::VoteLedger;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub ledger: VoteLedger,
    pub session: Arc<SessionConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(database: DatabaseConnection, session: SessionConfig) -> Self {
        assert!(
            !session.cookie_name.is_empty(),
            "Session cookie name must be configured"
        );
        Self {
            ledger: VoteLedger::new(database.clone()),
            database,
            session: Arc::new(session),
            start_time: Instant::now(),
        }
    }
}
