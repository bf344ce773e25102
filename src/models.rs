//! Data model types shared across the crate (spec.md §3).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Graph,
    Ivfpq,
    Hybrid,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Hybrid
    }
}

/// Physical type a metadata key is inferred to (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int64,
    Float64,
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketMeta {
    pub name: String,
    pub created: DateTime<Utc>,
    pub engine: String,
    pub version: u32,
}

impl BucketMeta {
    pub fn new(name: impl Into<String>) -> Self {
        BucketMeta {
            name: name.into(),
            created: Utc::now(),
            engine: "vectorbase".to_string(),
            version: 1,
        }
    }
}

/// Immutable-after-create index configuration (`_index_config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    pub dimension: u32,
    pub data_type: String,
    pub distance_metric: Metric,
    #[serde(default)]
    pub non_filterable_metadata_keys: Vec<String>,
    #[serde(default)]
    pub algorithm: Algorithm,
    pub created: DateTime<Utc>,
}

impl IndexConfig {
    pub fn new(dimension: u32, distance_metric: Metric, algorithm: Algorithm) -> Self {
        IndexConfig {
            dimension,
            data_type: "float32".to_string(),
            distance_metric,
            non_filterable_metadata_keys: Vec::new(),
            algorithm,
            created: Utc::now(),
        }
    }

    /// Whether two configs are equal in every field that governs
    /// idempotent re-create (spec.md §4.8): same dims, metric,
    /// algorithm choice, and non-filterable key set.
    pub fn same_parameters(&self, other: &IndexConfig) -> bool {
        self.dimension == other.dimension
            && self.distance_metric == other.distance_metric
            && self.algorithm == other.algorithm
            && self.non_filterable_metadata_keys == other.non_filterable_metadata_keys
    }
}

/// `manifest.json` — the atomic commit point of a build (spec.md §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub algo: Algorithm,
    pub dimension: u32,
    pub metric: Metric,
    pub vectors: u64,
    pub params: serde_json::Value,
    /// Content-hash of the manifest bytes; the backend-cache key
    /// (spec.md §4.7), not part of the AWS wire shape.
    #[serde(skip)]
    pub etag: String,
}

impl Manifest {
    /// Content hash of a manifest's serialized bytes — the
    /// backend-cache key (spec.md §4.7). `etag` is never part of the
    /// wire format, so both the write path (`builder.rs`) and every
    /// read path (`query.rs`) must call this on the exact bytes they
    /// hashed/loaded rather than trust a deserialized `etag` field,
    /// which is always `String::default()` coming off the wire.
    pub fn compute_etag(bytes: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}

/// A single write row as submitted by a client (spec.md §3 "Vector row").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRow {
    pub key: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A row as projected back out at query/get time: typed columns
/// overlaid on the JSON metadata blob (spec.md §4.7 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedRow {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_parameters_ignores_created_timestamp() {
        let a = IndexConfig::new(3, Metric::Cosine, Algorithm::Hybrid);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = IndexConfig::new(3, Metric::Cosine, Algorithm::Hybrid);
        assert!(a.same_parameters(&b));
        let c = IndexConfig::new(4, Metric::Cosine, Algorithm::Hybrid);
        assert!(!a.same_parameters(&c));
    }
}
