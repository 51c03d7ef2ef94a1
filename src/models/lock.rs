use serde::{Deserialize, Serialize};

/// 0..1 per detection; presence = locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteLock {
    pub detection_id: i64,
    pub locked_at: i64,
}
