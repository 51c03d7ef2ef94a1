use serde::{Deserialize, Serialize};

/// A small enum table; at minimum carries the value `"species"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelType {
    pub id: i64,
    pub name: String,
}

impl LabelType {
    pub const SPECIES: &'static str = "species";
    /// Seeded id for the `"species"` row (`DatabaseManager::ensure_seed_rows`).
    pub const SPECIES_ID: i64 = 1;
}

/// e.g. `"Aves"`; referenced by species labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomicClass {
    pub id: i64,
    pub name: String,
}

/// An interned classification target. Never mutated or deleted once
/// created; `scientific_name` never contains the legacy `_` separator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub scientific_name: String,
    pub label_type_id: i64,
    pub model_id: i64,
    pub taxonomic_class_id: Option<i64>,
}
