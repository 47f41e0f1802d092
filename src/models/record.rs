use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed row of `processed_messages`. `message_id` repeats on redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub id: i32,
    pub message_id: String,
    pub content: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapReport {
    Ready,
    Degraded(String),
}

impl BootstrapReport {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapReport::Ready)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub processed_messages_total: i64,
}
