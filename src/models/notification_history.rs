use serde::{Deserialize, Serialize};

/// Last-sent marker per `(label_id, notification_type)` with `expires_at`.
/// Persistence only — dispatch is an outer-collaborator concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHistory {
    pub label_id: i64,
    pub notification_type: String,
    pub last_sent_at: i64,
    pub expires_at: i64,
}
