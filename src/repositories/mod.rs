pub mod comment_repo;
pub mod detection_repo;
pub mod image_cache_repo;
pub mod label_repo;
pub mod lock_repo;
pub mod model_repo;
pub mod notification_repo;
pub mod review_repo;
pub mod source_repo;
pub mod threshold_repo;
pub mod weather_repo;

pub use comment_repo::CommentRepository;
pub use detection_repo::{
    DetectionRepository, DetectionWithRelations, HourlyCount, ResolvedDetectionRow, SearchFilter, SpeciesCount,
};
pub use image_cache_repo::ImageCacheRepository;
pub use label_repo::LabelRepository;
pub use lock_repo::LockRepository;
pub use model_repo::ModelRepository;
pub use notification_repo::NotificationRepository;
pub use review_repo::ReviewRepository;
pub use source_repo::SourceRepository;
pub use threshold_repo::ThresholdRepository;
pub use weather_repo::WeatherRepository;
