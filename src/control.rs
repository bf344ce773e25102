//! Control Plane (spec.md §4.8) — validation and bucket/index lifecycle.
//!
//! Grounded on `examples/original_source/src/app/errors.py`'s
//! `validate_*` function family, translated to Rust validators that
//! return `Error::Validation`. Limits follow `spec.md` §4.8 exactly
//! where it's more specific than the Python prototype (e.g. the
//! prototype's 8KB/50-key metadata cap is a demo-scale shortcut;
//! `spec.md` specifies 40KiB per row with no key-count limit).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{BucketMeta, IndexConfig};
use crate::store::ObjectStore;

static INDEX_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static BUCKET_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9.-]+$").unwrap());

pub fn validate_dimension(dimension: u32, max_dim: usize) -> Result<()> {
    if dimension < 1 || dimension as usize > max_dim {
        return Err(Error::validation(format!(
            "vector dimension must be between 1 and {max_dim}, got {dimension}"
        )));
    }
    Ok(())
}

pub fn validate_batch_size(len: usize, max_batch: usize) -> Result<()> {
    if len > max_batch {
        return Err(Error::validation(format!(
            "batch size exceeds {max_batch} limit, got {len} vectors"
        )));
    }
    Ok(())
}

pub fn validate_top_k(top_k: usize, max_topk: usize) -> Result<()> {
    if top_k < 1 || top_k > max_topk {
        return Err(Error::validation(format!(
            "topK must be between 1 and {max_topk}, got {top_k}"
        )));
    }
    Ok(())
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::validation("vector key cannot be empty"));
    }
    if key.len() > 512 {
        return Err(Error::validation("vector key exceeds 512 byte limit"));
    }
    Ok(())
}

pub fn validate_metadata_size(metadata: &serde_json::Map<String, serde_json::Value>, max_bytes: usize) -> Result<()> {
    if metadata.is_empty() {
        return Ok(());
    }
    let size = serde_json::Value::Object(metadata.clone()).to_string().len();
    if size > max_bytes {
        return Err(Error::validation(format!(
            "per-row metadata exceeds {max_bytes} byte limit, got {size} bytes"
        )));
    }
    Ok(())
}

pub fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("index name cannot be empty"));
    }
    if name.len() > 255 {
        return Err(Error::validation("index name exceeds 255 character limit"));
    }
    if !INDEX_NAME_RE.is_match(name) {
        return Err(Error::validation(
            "index name must contain only alphanumeric characters, hyphens, and underscores",
        ));
    }
    Ok(())
}

pub fn validate_bucket_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(Error::validation("bucket name must be between 3 and 63 characters"));
    }
    if !BUCKET_NAME_RE.is_match(name) {
        return Err(Error::validation(
            "bucket name must contain only lowercase letters, numbers, dots, and hyphens",
        ));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(Error::validation("bucket name cannot start or end with a dot"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::validation("bucket name cannot start or end with a hyphen"));
    }
    Ok(())
}

/// Bucket/index lifecycle and validation, built on the Object Store
/// Adapter. Grounded on `original_source/src/app/errors.py`'s
/// `validate_*` family (spec.md §4.8).
pub struct ControlPlane {
    store: ObjectStore,
    cfg: Config,
}

impl ControlPlane {
    pub fn new(store: ObjectStore, cfg: Config) -> Self {
        ControlPlane { store, cfg }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub async fn create_bucket(&self, name: &str) -> Result<BucketMeta> {
        validate_bucket_name(name)?;
        let key = "_meta/bucket.json";
        if let Some(existing) = self.store.get_json::<BucketMeta>(name, key).await? {
            return Ok(existing);
        }
        let meta = BucketMeta::new(name);
        self.store.ensure_bucket(name).await?;
        self.store.put_json(name, key, &meta).await?;
        Ok(meta)
    }

    pub async fn get_bucket(&self, name: &str) -> Result<BucketMeta> {
        self.store
            .get_json(name, "_meta/bucket.json")
            .await?
            .ok_or_else(|| Error::not_found(format!("bucket {name} does not exist")))
    }

    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.get_bucket(name).await?;
        self.store.delete_prefix(name, "").await
    }

    /// Create is idempotent under identical parameters, conflict
    /// otherwise (spec.md §4.8).
    pub async fn create_index(&self, bucket: &str, index: &str, config: IndexConfig) -> Result<IndexConfig> {
        validate_index_name(index)?;
        validate_dimension(config.dimension, self.cfg.max_dim)?;
        self.get_bucket(bucket).await?;

        let key = format!("{}/{}/_index_config.json", self.cfg.index_dir, index);
        if let Some(existing) = self.store.get_json::<IndexConfig>(bucket, &key).await? {
            if existing.same_parameters(&config) {
                return Ok(existing);
            }
            return Err(Error::conflict(format!(
                "index {index} already exists with different parameters"
            )));
        }
        self.store.put_json(bucket, &key, &config).await?;
        Ok(config)
    }

    pub async fn get_index(&self, bucket: &str, index: &str) -> Result<IndexConfig> {
        let key = format!("{}/{}/_index_config.json", self.cfg.index_dir, index);
        self.store
            .get_json(bucket, &key)
            .await?
            .ok_or_else(|| Error::not_found(format!("index {index} does not exist")))
    }

    pub async fn delete_index(&self, bucket: &str, index: &str) -> Result<()> {
        self.get_index(bucket, index).await?;
        let prefix = format!("{}/{}/", self.cfg.index_dir, index);
        self.store.delete_prefix(bucket, &prefix).await?;
        let staged_prefix = format!("{}/{}/", self.cfg.staged_dir, index);
        self.store.delete_prefix(bucket, &staged_prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Algorithm, Metric};

    #[test]
    fn dimension_limits() {
        assert!(validate_dimension(0, 4096).is_err());
        assert!(validate_dimension(1, 4096).is_ok());
        assert!(validate_dimension(4096, 4096).is_ok());
        assert!(validate_dimension(4097, 4096).is_err());
    }

    #[test]
    fn batch_size_over_limit_rejected() {
        assert!(validate_batch_size(500, 500).is_ok());
        assert!(validate_batch_size(501, 500).is_err());
    }

    #[test]
    fn bucket_name_rules() {
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("my-bucket").is_ok());
        assert!(validate_bucket_name("-bad").is_err());
        assert!(validate_bucket_name("bad-").is_err());
        assert!(validate_bucket_name(".bad").is_err());
        assert!(validate_bucket_name("Bad").is_err());
    }

    #[test]
    fn index_name_rules() {
        assert!(validate_index_name("").is_err());
        assert!(validate_index_name("valid_name-1").is_ok());
        assert!(validate_index_name("bad name").is_err());
    }

    #[tokio::test]
    async fn create_index_is_idempotent_under_same_parameters() {
        let store = ObjectStore::in_memory("vb-");
        let cfg = Config::from_env();
        let plane = ControlPlane::new(store, cfg);
        plane.create_bucket("my-bucket").await.unwrap();
        let cfg1 = IndexConfig::new(3, Metric::Cosine, Algorithm::Hybrid);
        plane.create_index("my-bucket", "i1", cfg1.clone()).await.unwrap();
        let again = plane.create_index("my-bucket", "i1", cfg1).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn create_index_conflicts_under_different_parameters() {
        let store = ObjectStore::in_memory("vb-");
        let cfg = Config::from_env();
        let plane = ControlPlane::new(store, cfg);
        plane.create_bucket("my-bucket").await.unwrap();
        plane
            .create_index("my-bucket", "i1", IndexConfig::new(3, Metric::Cosine, Algorithm::Hybrid))
            .await
            .unwrap();
        let conflict = plane
            .create_index("my-bucket", "i1", IndexConfig::new(4, Metric::Cosine, Algorithm::Hybrid))
            .await;
        assert!(matches!(conflict, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn create_index_requires_existing_bucket() {
        let store = ObjectStore::in_memory("vb-");
        let cfg = Config::from_env();
        let plane = ControlPlane::new(store, cfg);
        let result = plane
            .create_index("missing-bucket", "i1", IndexConfig::new(3, Metric::Cosine, Algorithm::Hybrid))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
