use serde::{Deserialize, Serialize};

/// An interned classifier identity `(name, version, variant)`, unique tuple.
/// Seeded with a default on `DatabaseManager::initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub variant: String,
}

impl Model {
    pub const DEFAULT_NAME: &'static str = "BirdNET";
    pub const DEFAULT_VERSION: &'static str = "2.4";
    pub const DEFAULT_VARIANT: &'static str = "default";
}
