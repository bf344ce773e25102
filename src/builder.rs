//! Index Builder (spec.md §4.6) — the transactional seam that
//! consolidates staged slices into an ID map and a rebuilt ANN backend.
//!
//! Grounded on `examples/original_source/src/app/index/indexer.py::
//! process_new_slices` (`_load_idmap`/`_write_idmap`/`_list_staged`/
//! `_load_slice`/`_store_index`/`_update_manifest`), translated from its
//! five-step Python flow into the eight steps spec.md §4.6 names.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::ann::{self, choose_algorithm, graph::GraphBackend, ivfpq::IvfPqBackend, Backend};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::idmap::IdMap;
use crate::models::{Algorithm, IndexConfig, Manifest};
use crate::schema::SchemaRegistry;
use crate::slice;
use crate::store::ObjectStore;

/// Advisory lock TTL — contention past this age is treated as an
/// abandoned lock, not a live writer (spec.md §4.6, §5).
const LOCK_TTL_MS: u128 = 60_000;

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis()
}

pub struct IndexBuilder {
    store: ObjectStore,
    cfg: Config,
}

impl IndexBuilder {
    pub fn new(store: ObjectStore, cfg: Config) -> Self {
        IndexBuilder { store, cfg }
    }

    fn config_key(&self, index: &str) -> String {
        format!("{}/{}/_index_config.json", self.cfg.index_dir, index)
    }

    fn manifest_key(&self, index: &str) -> String {
        format!("{}/{}/{}", self.cfg.index_dir, index, self.cfg.manifest_key_name)
    }

    fn idmap_key(&self, index: &str) -> String {
        format!("{}/{}/{}", self.cfg.index_dir, index, self.cfg.idmap_key_name)
    }

    fn backend_key(&self, index: &str, algo: Algorithm) -> String {
        format!("{}/{}/index.{}", self.cfg.index_dir, index, ann::algo_extension(algo))
    }

    fn lock_key(&self, index: &str) -> String {
        format!("{}/{}/.builder.lock", self.cfg.index_dir, index)
    }

    fn staged_prefix(&self, index: &str) -> String {
        format!("{}/{}/", self.cfg.staged_dir, index)
    }

    async fn acquire_lock(&self, bucket: &str, index: &str) -> Result<()> {
        let key = self.lock_key(index);
        if let Some(bytes) = self.store.get_bytes(bucket, &key).await? {
            let acquired_at: u128 = std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if now_millis().saturating_sub(acquired_at) < LOCK_TTL_MS {
                return Err(Error::dependency(format!(
                    "index {index} build already in progress, retry later"
                )));
            }
        }
        self.store
            .put_bytes(bucket, &key, now_millis().to_string().into_bytes())
            .await
    }

    async fn release_lock(&self, bucket: &str, index: &str) -> Result<()> {
        self.store.delete_object(bucket, &self.lock_key(index)).await
    }

    /// Runs the eight-step consolidation transaction. Returns `None` if
    /// there was nothing staged (step 1's early return); otherwise the
    /// newly committed manifest.
    pub async fn consolidate(&self, bucket: &str, index: &str) -> Result<Option<Manifest>> {
        // Step 1: enumerate staged slices; nothing to do is not an error.
        let staged_keys = self.store.list_prefix(bucket, &self.staged_prefix(index)).await?;
        if staged_keys.is_empty() {
            return Ok(None);
        }

        let index_config: IndexConfig = self
            .store
            .get_json(bucket, &self.config_key(index))
            .await?
            .ok_or_else(|| Error::not_found(format!("index {index} has no config")))?;

        self.acquire_lock(bucket, index).await?;
        let result = self.consolidate_locked(bucket, index, &index_config, &staged_keys).await;
        // A build that already committed (manifest written, slices
        // deleted) must not be reported as failed just because the
        // advisory lock's cleanup hiccuped — that only delays the next
        // writer past LOCK_TTL_MS, it doesn't undo the commit.
        if let Err(e) = self.release_lock(bucket, index).await {
            warn!(bucket, index, error = %e, "failed to release builder lock after consolidate");
        }
        result
    }

    async fn consolidate_locked(
        &self,
        bucket: &str,
        index: &str,
        index_config: &IndexConfig,
        staged_keys: &[String],
    ) -> Result<Option<Manifest>> {
        // Step 2: load the current id map, or start fresh.
        let mut idmap = match self.store.get_bytes(bucket, &self.idmap_key(index)).await? {
            Some(bytes) => IdMap::from_parquet_bytes(&bytes)?,
            None => IdMap::empty(),
        };

        // Step 3: apply staged slices in lexicographic (= time) order.
        for key in staged_keys {
            let bytes = self
                .store
                .get_bytes(bucket, key)
                .await?
                .ok_or_else(|| Error::dependency(format!("staged slice {key} vanished mid-build")))?;
            let rows = slice::decode(&bytes, self.cfg.slice_format)?;
            for row in &rows {
                if row.vector.len() != index_config.dimension as usize {
                    return Err(Error::internal(format!(
                        "slice {key} carries a vector of dimension {} for index {index} (dimension {})",
                        row.vector.len(),
                        index_config.dimension
                    )));
                }
            }
            idmap.append(rows);
        }

        // Step 4: persist the new id map. A single `put` is the commit
        // point here (spec.md §4.6 note on stores without atomic rename).
        let idmap_bytes = idmap.to_parquet_bytes()?;
        self.store.put_bytes(bucket, &self.idmap_key(index), idmap_bytes).await?;

        // Step 5: choose the algorithm per the hybrid policy.
        let algo = choose_algorithm(
            index_config.algorithm,
            idmap.alive_count() as usize,
            self.cfg.hybrid_threshold,
        );

        // Step 6: build the backend from the current (just-committed) id map.
        let alive: Vec<_> = idmap.rows().iter().filter(|r| r.alive).collect();
        let ids: Vec<i64> = alive.iter().map(|r| r.id).collect();
        let vectors: Vec<Vec<f32>> = alive.iter().map(|r| r.vector.clone()).collect();

        let mut backend: Box<dyn Backend> = match algo {
            Algorithm::Graph => Box::new(GraphBackend::new(index_config.distance_metric)),
            Algorithm::Ivfpq => Box::new(IvfPqBackend::new(
                index_config.distance_metric,
                self.cfg.ivfpq_nlist,
                self.cfg.ivfpq_m,
                self.cfg.ivfpq_nbits,
            )),
            Algorithm::Hybrid => unreachable!("choose_algorithm never returns Hybrid"),
        };
        backend.build(&ids, &vectors)?;
        let backend_bytes = backend.save()?;
        self.store
            .put_bytes(bucket, &self.backend_key(index, algo), backend_bytes)
            .await?;

        // Schema evolution is re-derived from the full id map on every
        // build (cheap at this scale, and avoids persisting a second
        // source of truth for typed columns — see schema.rs).
        let mut registry = SchemaRegistry::new(index_config.non_filterable_metadata_keys.clone());
        let all_rows: Vec<crate::models::VectorRow> = idmap
            .rows()
            .iter()
            .map(|r| crate::models::VectorRow {
                key: r.key.clone(),
                vector: r.vector.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        registry.evolve(&all_rows);

        // Step 7: write the manifest last — the externally visible commit.
        let params = serde_json::json!({
            "nlist": self.cfg.ivfpq_nlist,
            "m": self.cfg.ivfpq_m,
            "nbits": self.cfg.ivfpq_nbits,
            "hnswM": self.cfg.hnsw_m,
            "hnswEfConstruction": self.cfg.hnsw_ef_construction,
            "typedColumns": registry.columns().iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
        });
        let mut manifest = Manifest {
            algo,
            dimension: index_config.dimension,
            metric: index_config.distance_metric,
            vectors: idmap.alive_count(),
            params,
            etag: String::new(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest)?;
        manifest.etag = Manifest::compute_etag(&manifest_bytes);
        self.store.put_json(bucket, &self.manifest_key(index), &manifest).await?;

        // Step 8: delete exactly the slices we consolidated — not a
        // fresh listing, so slices staged mid-build survive for the
        // next run (spec.md §4.6's idempotence-against-reapplication note).
        for key in staged_keys {
            self.store.delete_object(bucket, key).await?;
        }

        info!(
            bucket,
            index,
            algo = ?algo,
            vectors = manifest.vectors,
            "index build committed"
        );
        Ok(Some(manifest))
    }
}
