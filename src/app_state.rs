use sqlx::PgPool;
use std::sync::Arc;

use crate::services::queue::QueueClient;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<QueueClient>,
}

impl AppState {
    pub fn new(db: PgPool, queue: QueueClient) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
        }
    }
}
