//! Defines the state shared across the Axum application.
use std::sync::Arc;

use crate::{db, services::gateway::PaymentGateway};

#[derive(Clone)]
/// The state struct shared across routers.
pub struct AppState {
    /// A database connection pool for getting new database connections.
    pub db_conn: db::ConnectionPool,
    /// The payment gateway seam, live or demo depending on configuration.
    pub gateway: Arc<dyn PaymentGateway>,
}
