//! Object Store Adapter (spec.md §4.1).
//!
//! Uniform access to an S3-compatible store with path-style addressing.
//! Grounded on `examples/original_source/src/app/storage/s3_backend.py`;
//! built on the `object_store` crate the way
//! `examples/stormasm-ioxnu22july`'s `object_store_metrics` /
//! `ioxd_router` / `parquet_file` crates do.
//!
//! This is the only component aware of the bucket-name prefix; callers
//! above it always address buckets by their user-visible name.

use bytes::Bytes;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{aws::AmazonS3Builder, ObjectStore as _};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};

/// Thin wrapper around `Arc<dyn object_store::ObjectStore>` that adds
/// vector-bucket-name prefixing and the layout helpers from spec.md §6.
#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<dyn object_store::ObjectStore>,
    prefix: String,
}

impl ObjectStore {
    /// Build an adapter talking to a real S3-compatible endpoint
    /// (MinIO), path-style addressing, from `Config`.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let s3 = AmazonS3Builder::new()
            .with_endpoint(cfg.s3_endpoint_url.clone())
            .with_access_key_id(cfg.s3_access_key.clone())
            .with_secret_access_key(cfg.s3_secret_key.clone())
            .with_region(cfg.s3_region.clone())
            .with_bucket_name(cfg.s3_bucket.clone())
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false)
            .build()
            .map_err(|e| Error::dependency(format!("failed to build S3 client: {e}")))?;

        Ok(ObjectStore {
            inner: Arc::new(s3),
            prefix: cfg.s3_bucket_prefix.clone(),
        })
    }

    /// An in-memory adapter for tests — same contract, no network.
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        ObjectStore {
            inner: Arc::new(InMemory::new()),
            prefix: prefix.into(),
        }
    }

    pub fn bucket_name(&self, vector_bucket: &str) -> String {
        format!("{}{}", self.prefix, vector_bucket)
    }

    fn full_path(&self, vector_bucket: &str, key: &str) -> Path {
        Path::from(format!("{}/{}", self.bucket_name(vector_bucket), key))
    }

    /// There is one physical S3 bucket (`Config::s3_bucket`); vector
    /// buckets are key prefixes within it, so there is no distinct
    /// physical bucket to provision per call, unlike
    /// `s3_backend.py::ensure_bucket`'s `create_bucket(Bucket=bn)`.
    /// This still probes the store under the vector bucket's prefix so
    /// a misconfigured endpoint/credentials/region surfaces here,
    /// at bucket-creation time, instead of silently deferring the
    /// first real error to whatever write happens to come next.
    pub async fn ensure_bucket(&self, vector_bucket: &str) -> Result<()> {
        let probe = Path::from(format!("{}/", self.bucket_name(vector_bucket)));
        let mut stream = self.inner.list(Some(&probe));
        if let Some(result) = stream.next().await {
            result?;
        }
        Ok(())
    }

    pub async fn put_bytes(&self, vector_bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.full_path(vector_bucket, key);
        self.inner.put(&path, Bytes::from(body).into()).await?;
        Ok(())
    }

    /// Returns `Ok(None)` on a missing object rather than an error, so
    /// callers can treat absence as a normal outcome (spec.md §4.1).
    pub async fn get_bytes(&self, vector_bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.full_path(vector_bucket, key);
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn put_json<T: serde::Serialize>(
        &self,
        vector_bucket: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.put_bytes(vector_bucket, key, body).await
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        vector_bucket: &str,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get_bytes(vector_bucket, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lists every key under `prefix`, hiding the store's own
    /// pagination. Returned in lexicographic order (object_store's
    /// `list` already yields that within a single backend).
    pub async fn list_prefix(&self, vector_bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_path(vector_bucket, prefix);
        let bucket_root = format!("{}/", self.bucket_name(vector_bucket));
        let mut stream = self.inner.list(Some(&full_prefix));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            let full = meta.location.to_string();
            let relative = full.strip_prefix(&bucket_root).unwrap_or(&full).to_string();
            keys.push(relative);
        }
        keys.sort();
        Ok(keys)
    }

    /// Deletes every object under `prefix`. `object_store`'s `delete`
    /// is per-key; batching here mirrors `s3_backend.py::delete_prefix`'s
    /// "groups of 1000" purely as an upper bound on in-flight deletes.
    pub async fn delete_prefix(&self, vector_bucket: &str, prefix: &str) -> Result<()> {
        let keys = self.list_prefix(vector_bucket, prefix).await?;
        for chunk in keys.chunks(1000) {
            for key in chunk {
                self.delete_object(vector_bucket, key).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_object(&self, vector_bucket: &str, key: &str) -> Result<()> {
        let path = self.full_path(vector_bucket, key);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trips() {
        let store = ObjectStore::in_memory("vb-");
        store
            .put_bytes("b1", "indexes/i1/manifest.json", b"{\"a\":1}".to_vec())
            .await
            .unwrap();
        let got = store
            .get_bytes("b1", "indexes/i1/manifest.json")
            .await
            .unwrap();
        assert_eq!(got, Some(b"{\"a\":1}".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let store = ObjectStore::in_memory("vb-");
        let got = store.get_bytes("b1", "nope").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn list_and_delete_prefix() {
        let store = ObjectStore::in_memory("vb-");
        store
            .put_bytes("b1", "staged/i1/slice-1.parquet", vec![1])
            .await
            .unwrap();
        store
            .put_bytes("b1", "staged/i1/slice-2.parquet", vec![2])
            .await
            .unwrap();
        store
            .put_bytes("b1", "indexes/i1/manifest.json", vec![3])
            .await
            .unwrap();

        let listed = store.list_prefix("b1", "staged/i1/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0] < listed[1]);

        store.delete_prefix("b1", "staged/i1/").await.unwrap();
        let after = store.list_prefix("b1", "staged/i1/").await.unwrap();
        assert!(after.is_empty());

        let untouched = store.get_bytes("b1", "indexes/i1/manifest.json").await.unwrap();
        assert_eq!(untouched, Some(vec![3]));
    }

    #[tokio::test]
    async fn bucket_name_is_prefixed() {
        let store = ObjectStore::in_memory("vb-");
        assert_eq!(store.bucket_name("my-bucket"), "vb-my-bucket");
    }
}
