use serde::{Deserialize, Serialize};

/// Many per detection, ordered by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteComment {
    pub id: i64,
    pub detection_id: i64,
    pub body: String,
    pub created_at: i64,
}
