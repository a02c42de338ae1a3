use std::sync::Arc;

use crate::db::Database;
use crate::purchase::{PurchaseCoordinator, PurchaseQueries};

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Drives every state-changing call
    pub coordinator: Arc<PurchaseCoordinator>,
    /// Read-only buyer/admin views
    pub queries: Arc<PurchaseQueries>,
    /// PostgreSQL pool, absent when running on the in-memory store
    pub pg_db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(coordinator: Arc<PurchaseCoordinator>, pg_db: Option<Arc<Database>>) -> Self {
        Self {
            queries: Arc::new(PurchaseQueries::new(coordinator.clone())),
            coordinator,
            pg_db,
        }
    }
}
