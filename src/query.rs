//! Query Engine (spec.md §4.7) — the six-step read path.
//!
//! Grounded on `examples/original_source/src/app/index/indexer.py::
//! search`/`get_vectors_by_ids` (manifest + idmap load, alive-filtering,
//! backend load-then-search, post-filter) and the teacher's own
//! `src/query.rs::hybrid_query` (oversample + filter + lookup shape).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ann::{self, Backend, Hit, SENTINEL_ID};
use crate::cache::{self, BackendCache};
use crate::config::Config;
use crate::control::validate_top_k;
use crate::error::{Error, Result};
use crate::filter::FilterExpr;
use crate::idmap::IdMap;
use crate::models::{Algorithm, IndexConfig, Manifest, Metric, ProjectedRow, VectorRow};
use crate::schema::SchemaRegistry;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query_vector: Vec<f32>,
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<FilterExpr>,
    #[serde(default)]
    pub nprobe: Option<usize>,
    #[serde(default = "default_true")]
    pub return_data: bool,
    #[serde(default = "default_true")]
    pub return_metadata: bool,
    #[serde(default = "default_true")]
    pub return_distance: bool,
}

fn default_true() -> bool {
    true
}

/// Neither implemented backend claims native predicate pushdown
/// (spec.md §4.5: the graph backend is explicit about this, and the
/// IVF-PQ backend's `search` carries no filter parameter either — see
/// DESIGN.md's Open Question note). Step 3's branch below is real,
/// reachable code the day a backend does support it; today it always
/// routes queries through step 4's overfetch-then-postfilter path.
fn backend_supports_pushdown(_algo: Algorithm) -> bool {
    false
}

pub struct QueryEngine {
    store: ObjectStore,
    cfg: Config,
    cache: Arc<Mutex<BackendCache>>,
}

impl QueryEngine {
    pub fn new(store: ObjectStore, cfg: Config) -> Self {
        let cache = Arc::new(Mutex::new(BackendCache::new(cfg.backend_cache_capacity)));
        QueryEngine { store, cfg, cache }
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

    /// Loads the manifest and recomputes `etag` from its raw bytes —
    /// `etag` is `#[serde(skip)]`d out of the wire format, so a
    /// deserialized `Manifest` always carries `etag == ""` unless the
    /// caller reconstructs it the same way `builder.rs` did at write
    /// time (spec.md §4.7 step 2's cache key depends on this matching).
    async fn load_manifest(&self, bucket: &str, index: &str) -> Result<Option<Manifest>> {
        match self.store.get_bytes(bucket, &self.manifest_key(index)).await? {
            Some(bytes) => {
                let mut manifest: Manifest = serde_json::from_slice(&bytes)?;
                manifest.etag = Manifest::compute_etag(&bytes);
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    async fn load_idmap(&self, bucket: &str, index: &str) -> Result<IdMap> {
        match self.store.get_bytes(bucket, &self.idmap_key(index)).await? {
            Some(bytes) => IdMap::from_parquet_bytes(&bytes),
            None => Ok(IdMap::empty()),
        }
    }

    async fn load_registry(&self, bucket: &str, index: &str, idmap: &IdMap) -> Result<SchemaRegistry> {
        let index_config: IndexConfig = self
            .store
            .get_json(bucket, &self.config_key(index))
            .await?
            .ok_or_else(|| Error::not_found(format!("index {index} does not exist")))?;
        let mut registry = SchemaRegistry::new(index_config.non_filterable_metadata_keys);
        let rows: Vec<VectorRow> = idmap
            .rows()
            .iter()
            .map(|r| VectorRow { key: r.key.clone(), vector: r.vector.clone(), metadata: r.metadata.clone() })
            .collect();
        registry.evolve(&rows);
        Ok(registry)
    }

    async fn load_backend(&self, bucket: &str, index: &str, manifest: &Manifest) -> Result<Arc<dyn Backend>> {
        let key = cache::cache_key(bucket, index, &manifest.etag);
        if let Some(backend) = self.cache.lock().await.get(&key) {
            return Ok(backend);
        }
        let bytes = self
            .store
            .get_bytes(bucket, &self.backend_key(index, manifest.algo))
            .await?
            .ok_or_else(|| Error::dependency(format!("backend blob for index {index} is missing")))?;
        let backend: Arc<dyn Backend> = Arc::from(ann::load_backend(manifest.algo, &bytes)?);
        self.cache.lock().await.insert(key, backend.clone());
        Ok(backend)
    }

    /// The six-step algorithm of spec.md §4.7.
    pub async fn query(&self, bucket: &str, index: &str, req: QueryRequest) -> Result<Vec<ProjectedRow>> {
        validate_top_k(req.top_k, self.cfg.max_topk)?;

        // Step 1: read the manifest; absent or empty means empty result.
        let manifest = self.load_manifest(bucket, index).await?;
        let manifest = match manifest {
            Some(m) if m.vectors > 0 => m,
            _ => return Ok(Vec::new()),
        };
        if req.query_vector.len() != manifest.dimension as usize {
            return Err(Error::validation(format!(
                "query vector has dimension {} but index {index} has dimension {}",
                req.query_vector.len(),
                manifest.dimension
            )));
        }

        // Step 2: load backend from cache (keyed by manifest.etag).
        let backend = self.load_backend(bucket, index, &manifest).await?;
        let idmap = self.load_idmap(bucket, index).await?;

        let hits = if backend_supports_pushdown(manifest.algo) {
            match &req.filter {
                Some(filter) => {
                    let registry = self.load_registry(bucket, index, &idmap).await?;
                    if filter.all_leaves_typed(&registry) {
                        // Step 3: pushdown — restrict candidates first,
                        // then rank directly (see module doc and
                        // DESIGN.md: no backend currently takes this path).
                        self.pushdown_search(manifest.metric, &idmap, filter, &req)?
                    } else {
                        self.overfetch_and_postfilter(backend.as_ref(), &idmap, &req)
                    }
                }
                None => backend.search(&req.query_vector, req.top_k, req.nprobe),
            }
        } else {
            // Step 4: overfetch, then apply the filter tree in process.
            self.overfetch_and_postfilter(backend.as_ref(), &idmap, &req)
        };

        // Step 5: join surviving ids to the id map, dropping tombstoned
        // and unknown/sentinel ids.
        let mut projected: Vec<ProjectedRow> = hits
            .into_iter()
            .filter(|h| h.id != SENTINEL_ID)
            .filter_map(|h| {
                let row = idmap.lookup_by_id(h.id)?;
                if !row.alive {
                    return None;
                }
                Some(ProjectedRow {
                    key: row.key.clone(),
                    distance: req.return_distance.then_some(h.distance),
                    vector: req.return_data.then(|| row.vector.clone()),
                    metadata: req.return_metadata.then(|| serde_json::Value::Object(row.metadata.clone())),
                })
            })
            .take(req.top_k)
            .collect();

        // Step 6: order by distance ascending.
        projected.sort_by(|a, b| {
            a.distance
                .unwrap_or(f32::INFINITY)
                .partial_cmp(&b.distance.unwrap_or(f32::INFINITY))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(projected)
    }

    fn overfetch_and_postfilter(&self, backend: &dyn Backend, idmap: &IdMap, req: &QueryRequest) -> Vec<Hit> {
        let fetch_k = req.top_k * self.cfg.query_over_fetch.max(1);
        let raw = backend.search(&req.query_vector, fetch_k, req.nprobe);
        match &req.filter {
            None => raw,
            Some(filter) => raw
                .into_iter()
                .filter(|h| {
                    if h.id == SENTINEL_ID {
                        return false;
                    }
                    match idmap.lookup_by_id(h.id) {
                        Some(row) if row.alive => filter.matches(&row.metadata),
                        _ => false,
                    }
                })
                .collect(),
        }
    }

    /// Restricts the candidate set by the filter's in-process semantics
    /// over the full id map (`FilterExpr::matches` and `FilterExpr::
    /// to_sql` are required to produce identical sets, spec.md §8), then
    /// ranks the restricted set directly by distance.
    fn pushdown_search(&self, metric: Metric, idmap: &IdMap, filter: &FilterExpr, req: &QueryRequest) -> Result<Vec<Hit>> {
        let mut hits: Vec<Hit> = idmap
            .rows()
            .iter()
            .filter(|r| r.alive && filter.matches(&r.metadata))
            .map(|r| Hit { id: r.id, distance: ann::distance(metric, &req.query_vector, &r.vector) })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        hits.truncate(req.top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::control::ControlPlane;
    use crate::models::{Algorithm, Metric};
    use crate::slice;

    async fn seeded_index(bucket: &str, index: &str, dim: u32, rows: Vec<VectorRow>) -> (ObjectStore, Config) {
        let store = ObjectStore::in_memory("vb-");
        let cfg = Config::from_env();
        let plane = ControlPlane::new(store.clone(), cfg.clone());
        plane.create_bucket(bucket).await.unwrap();
        plane
            .create_index(bucket, index, IndexConfig::new(dim, Metric::Cosine, Algorithm::Graph))
            .await
            .unwrap();
        let bytes = slice::encode_parquet(&rows).unwrap();
        let key = slice::staged_key(index, 1, "parquet");
        store.put_bytes(bucket, &key, bytes).await.unwrap();
        let builder = IndexBuilder::new(store.clone(), cfg.clone());
        builder.consolidate(bucket, index).await.unwrap();
        (store, cfg)
    }

    #[tokio::test]
    async fn s1_nearest_neighbor_query_returns_closest_keys() {
        let (store, cfg) = seeded_index(
            "b1",
            "i1",
            3,
            vec![
                VectorRow { key: "a".into(), vector: vec![1.0, 0.0, 0.0], metadata: Default::default() },
                VectorRow { key: "b".into(), vector: vec![0.0, 1.0, 0.0], metadata: Default::default() },
                VectorRow { key: "c".into(), vector: vec![0.0, 0.0, 1.0], metadata: Default::default() },
            ],
        )
        .await;
        let engine = QueryEngine::new(store, cfg);
        let results = engine
            .query(
                "b1",
                "i1",
                QueryRequest {
                    query_vector: vec![1.0, 0.0, 0.0],
                    top_k: 2,
                    filter: None,
                    nprobe: None,
                    return_data: true,
                    return_metadata: true,
                    return_distance: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "a");
        assert!(results[0].distance.unwrap() < 1e-5);
    }

    #[tokio::test]
    async fn s2_filtered_query_returns_matching_metadata() {
        let (store, cfg) = seeded_index(
            "b1",
            "i1",
            3,
            vec![VectorRow {
                key: "a".into(),
                vector: vec![1.0, 0.0, 0.0],
                metadata: serde_json::json!({"cat": "x", "score": 7}).as_object().unwrap().clone(),
            }],
        )
        .await;
        let engine = QueryEngine::new(store, cfg);
        let results = engine
            .query(
                "b1",
                "i1",
                QueryRequest {
                    query_vector: vec![1.0, 0.0, 0.0],
                    top_k: 1,
                    filter: Some(FilterExpr::Equals { metadata_key: "cat".into(), value: serde_json::json!("x") }),
                    nprobe: None,
                    return_data: false,
                    return_metadata: true,
                    return_distance: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "a");
        assert_eq!(results[0].metadata.as_ref().unwrap()["score"], 7);
    }

    #[tokio::test]
    async fn query_against_empty_index_returns_empty() {
        let store = ObjectStore::in_memory("vb-");
        let cfg = Config::from_env();
        let plane = ControlPlane::new(store.clone(), cfg.clone());
        plane.create_bucket("b1").await.unwrap();
        plane
            .create_index("b1", "i1", IndexConfig::new(3, Metric::Cosine, Algorithm::Graph))
            .await
            .unwrap();
        let engine = QueryEngine::new(store, cfg);
        let results = engine
            .query(
                "b1",
                "i1",
                QueryRequest {
                    query_vector: vec![1.0, 0.0, 0.0],
                    top_k: 5,
                    filter: None,
                    nprobe: None,
                    return_data: true,
                    return_metadata: true,
                    return_distance: true,
                },
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_validation_error() {
        let (store, cfg) = seeded_index(
            "b1",
            "i1",
            3,
            vec![VectorRow { key: "a".into(), vector: vec![1.0, 0.0, 0.0], metadata: Default::default() }],
        )
        .await;
        let engine = QueryEngine::new(store, cfg);
        let result = engine
            .query(
                "b1",
                "i1",
                QueryRequest {
                    query_vector: vec![1.0, 0.0],
                    top_k: 1,
                    filter: None,
                    nprobe: None,
                    return_data: false,
                    return_metadata: false,
                    return_distance: true,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn topk_larger_than_dataset_returns_all_live_rows() {
        let (store, cfg) = seeded_index(
            "b1",
            "i1",
            2,
            vec![
                VectorRow { key: "a".into(), vector: vec![1.0, 0.0], metadata: Default::default() },
                VectorRow { key: "b".into(), vector: vec![0.0, 1.0], metadata: Default::default() },
            ],
        )
        .await;
        let engine = QueryEngine::new(store, cfg);
        let results = engine
            .query(
                "b1",
                "i1",
                QueryRequest {
                    query_vector: vec![1.0, 0.0],
                    top_k: 30,
                    filter: None,
                    nprobe: None,
                    return_data: false,
                    return_metadata: false,
                    return_distance: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn pushdown_search_matches_postfilter_reference_semantics() {
        let mut idmap = IdMap::empty();
        idmap.append(vec![
            VectorRow {
                key: "a".into(),
                vector: vec![1.0, 0.0, 0.0],
                metadata: serde_json::json!({"cat": "x"}).as_object().unwrap().clone(),
            },
            VectorRow {
                key: "b".into(),
                vector: vec![0.0, 1.0, 0.0],
                metadata: serde_json::json!({"cat": "y"}).as_object().unwrap().clone(),
            },
        ]);
        let filter = FilterExpr::Equals { metadata_key: "cat".into(), value: serde_json::json!("x") };
        let cfg = Config::from_env();
        let engine = QueryEngine::new(ObjectStore::in_memory("vb-"), cfg);
        let req = QueryRequest {
            query_vector: vec![1.0, 0.0, 0.0],
            top_k: 5,
            filter: Some(filter.clone()),
            nprobe: None,
            return_data: false,
            return_metadata: false,
            return_distance: true,
        };
        let hits = engine.pushdown_search(Metric::Euclidean, &idmap, &filter, &req).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, idmap.lookup_by_key("a").unwrap().id);
    }
}
