use serde::{Deserialize, Serialize};

/// A deduplicated audio source (e.g. `rtsp_camera1`). Many detections per
/// source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSource {
    pub id: i64,
    pub safe_string: String,
}
