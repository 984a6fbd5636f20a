use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An uploaded inspection image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Photo {
    pub id: Uuid,
    pub inspection_id: Uuid,
    pub organization_id: Uuid,
    /// Object key in photo storage.
    pub storage_key: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A regulatory safety rule referenced by detected violations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct SafetyCode {
    pub id: Uuid,
    pub code: String,
    pub description: String,
    pub country: String,
}
