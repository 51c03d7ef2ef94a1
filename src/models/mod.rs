pub mod comment;
pub mod daily_events;
pub mod detection;
pub mod image_cache;
pub mod label;
pub mod lock;
pub mod model;
pub mod notification_history;
pub mod review;
pub mod source;
pub mod threshold;
pub mod weather;

pub use comment::NoteComment;
pub use daily_events::DailyEvents;
pub use detection::{ClassifierResult, Detection, DetectionInput, Note};
pub use image_cache::ImageCacheEntry;
pub use label::{Label, LabelType, TaxonomicClass};
pub use lock::NoteLock;
pub use model::Model;
pub use notification_history::NotificationHistory;
pub use review::NoteReview;
pub use source::AudioSource;
pub use threshold::{DynamicThreshold, ThresholdEvent};
pub use weather::Weather;

/// Split a legacy concatenated label (`"Scientific_Common"`) into its
/// scientific and common parts. Splits on the FIRST `_`; a label with no `_`
/// is returned verbatim as the scientific name with no common name. The
/// common name produced this way is discarded by the database layer — it
/// comes from the external label map at read time, never stored — but
/// callers outside the database (e.g. the legacy adapter) still want it.
pub fn split_legacy_label(raw: &str) -> (String, Option<String>) {
    match raw.split_once('_') {
        Some((scientific, common)) if !scientific.is_empty() => {
            (scientific.to_string(), Some(common.to_string()))
        }
        _ => (raw.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_underscore_only() {
        let (sci, common) = split_legacy_label("Picus viridis_vihertikka_extra");
        assert_eq!(sci, "Picus viridis");
        assert_eq!(common.as_deref(), Some("vihertikka_extra"));
    }

    #[test]
    fn label_without_underscore_is_verbatim() {
        let (sci, common) = split_legacy_label("Picus viridis");
        assert_eq!(sci, "Picus viridis");
        assert_eq!(common, None);
    }

    #[test]
    fn leading_underscore_is_not_split() {
        // An empty scientific-name prefix isn't a valid split; treat as verbatim.
        let (sci, common) = split_legacy_label("_vihertikka");
        assert_eq!(sci, "_vihertikka");
        assert_eq!(common, None);
    }
}
