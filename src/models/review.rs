use serde::{Deserialize, Serialize};

/// 0..1 per detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteReview {
    pub detection_id: i64,
    pub verdict: String,
    pub created_at: i64,
}

impl NoteReview {
    pub const CORRECT: &'static str = "correct";
    pub const FALSE_POSITIVE: &'static str = "false_positive";
}
