//! HTTP/REST front door (spec.md §6, SPEC_FULL.md §6) — the native
//! path-style surface only; the action-surface/ARN-tolerant front door
//! is explicitly out of scope (spec.md §1).
//!
//! Grounded on the teacher's own `src/rest.rs` (`AppState`, Axum router
//! shape, `tower::ServiceExt::oneshot` test pattern), generalized from
//! NoSQL-document endpoints to this service's bucket/index/vector
//! surface.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::builder::IndexBuilder;
use crate::config::Config;
use crate::control::{self, ControlPlane};
use crate::error::Error;
use crate::idmap::IdMap;
use crate::models::{BucketMeta, IndexConfig, Manifest, ProjectedRow, VectorRow};
use crate::query::{QueryEngine, QueryRequest};
use crate::slice;
use crate::store::ObjectStore;

/// Wraps `crate::error::Error` for the `IntoResponse` impl (orphan
/// rules forbid implementing a foreign trait for a foreign type
/// directly).
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "Error": {
                "Code": self.0.aws_code(),
                "Message": self.0.message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    store: ObjectStore,
    cfg: Config,
    control: Arc<ControlPlane>,
    builder: Arc<IndexBuilder>,
    query: Arc<QueryEngine>,
}

pub fn create_router(store: ObjectStore, cfg: Config) -> Router {
    let state = Arc::new(AppState {
        store: store.clone(),
        cfg: cfg.clone(),
        control: Arc::new(ControlPlane::new(store.clone(), cfg.clone())),
        builder: Arc::new(IndexBuilder::new(store.clone(), cfg.clone())),
        query: Arc::new(QueryEngine::new(store, cfg)),
    });

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/buckets/:bucket", put(create_bucket_handler))
        .route("/buckets/:bucket", get(get_bucket_handler))
        .route("/buckets/:bucket", delete(delete_bucket_handler))
        .route("/buckets/:bucket/indexes/:index", post(create_index_handler))
        .route("/buckets/:bucket/indexes/:index", get(get_index_handler))
        .route("/buckets/:bucket/indexes/:index", delete(delete_index_handler))
        .route("/buckets/:bucket/indexes/:index/vectors", post(put_vectors_handler))
        .route("/buckets/:bucket/indexes/:index/query", post(query_handler))
        .route("/buckets/:bucket/indexes/:index/vectors:get", post(get_vectors_handler))
        .route("/buckets/:bucket/indexes/:index/vectors:list", post(list_vectors_handler))
        .route("/buckets/:bucket/indexes/:index/vectors:delete", post(delete_vectors_handler))
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn create_bucket_handler(State(state): State<Arc<AppState>>, Path(bucket): Path<String>) -> ApiResult<Json<BucketMeta>> {
    Ok(Json(state.control.create_bucket(&bucket).await?))
}

async fn get_bucket_handler(State(state): State<Arc<AppState>>, Path(bucket): Path<String>) -> ApiResult<Json<BucketMeta>> {
    Ok(Json(state.control.get_bucket(&bucket).await?))
}

async fn delete_bucket_handler(State(state): State<Arc<AppState>>, Path(bucket): Path<String>) -> ApiResult<StatusCode> {
    state.control.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIndexBody {
    dimension: u32,
    distance_metric: crate::models::Metric,
    #[serde(default)]
    algorithm: crate::models::Algorithm,
    #[serde(default)]
    non_filterable_metadata_keys: Vec<String>,
}

async fn create_index_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
    Json(body): Json<CreateIndexBody>,
) -> ApiResult<Json<IndexConfig>> {
    let mut config = IndexConfig::new(body.dimension, body.distance_metric, body.algorithm);
    config.non_filterable_metadata_keys = body.non_filterable_metadata_keys;
    Ok(Json(state.control.create_index(&bucket, &index, config).await?))
}

async fn get_index_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
) -> ApiResult<Json<IndexConfig>> {
    Ok(Json(state.control.get_index(&bucket, &index).await?))
}

async fn delete_index_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.control.delete_index(&bucket, &index).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PutVectorsBody {
    vectors: Vec<VectorRow>,
}

#[derive(Serialize)]
struct PutVectorsResponse {
    accepted: usize,
    manifest: Option<Manifest>,
}

fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis()
}

/// Stage a write batch then consolidate synchronously, matching the
/// write data-flow of spec.md §2 (the builder can also be triggered by
/// an external job; this front door chooses the synchronous path so a
/// successful response always reflects a committed build).
async fn put_vectors_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
    Json(body): Json<PutVectorsBody>,
) -> ApiResult<Json<PutVectorsResponse>> {
    control::validate_batch_size(body.vectors.len(), state.cfg.max_batch)?;
    if body.vectors.is_empty() {
        return Ok(Json(PutVectorsResponse { accepted: 0, manifest: None }));
    }
    let index_config = state.control.get_index(&bucket, &index).await?;
    for row in &body.vectors {
        control::validate_key(&row.key)?;
        control::validate_dimension(row.vector.len() as u32, state.cfg.max_dim)?;
        if row.vector.len() != index_config.dimension as usize {
            return Err(Error::validation(format!(
                "vector for key {} has dimension {} but index {index} has dimension {}",
                row.key,
                row.vector.len(),
                index_config.dimension
            ))
            .into());
        }
        control::validate_metadata_size(&row.metadata, state.cfg.max_total_metadata_bytes)?;
    }

    let bytes = slice::encode(&body.vectors, state.cfg.slice_format)?;
    let key = slice::staged_key(&index, now_millis(), state.cfg.slice_format.extension());
    state.store.put_bytes(&bucket, &key, bytes).await?;

    let manifest = state.builder.consolidate(&bucket, &index).await?;
    Ok(Json(PutVectorsResponse { accepted: body.vectors.len(), manifest }))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<Vec<ProjectedRow>>> {
    Ok(Json(state.query.query(&bucket, &index, req).await?))
}

async fn load_idmap(state: &AppState, bucket: &str, index: &str) -> Result<IdMap, Error> {
    let key = format!("{}/{}/{}", state.cfg.index_dir, index, state.cfg.idmap_key_name);
    match state.store.get_bytes(bucket, &key).await? {
        Some(bytes) => IdMap::from_parquet_bytes(&bytes),
        None => Ok(IdMap::empty()),
    }
}

#[derive(Deserialize)]
struct GetVectorsBody {
    keys: Vec<String>,
}

async fn get_vectors_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
    Json(body): Json<GetVectorsBody>,
) -> ApiResult<Json<Vec<ProjectedRow>>> {
    let idmap = load_idmap(&state, &bucket, &index).await?;
    let rows: Vec<ProjectedRow> = body
        .keys
        .iter()
        .filter_map(|k| idmap.lookup_by_key(k))
        .map(|r| ProjectedRow {
            key: r.key.clone(),
            distance: None,
            vector: Some(r.vector.clone()),
            metadata: Some(serde_json::Value::Object(r.metadata.clone())),
        })
        .collect();
    Ok(Json(rows))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVectorsBody {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    100
}

#[derive(Serialize)]
struct ListVectorsResponse {
    vectors: Vec<ProjectedRow>,
    next_cursor: Option<String>,
}

async fn list_vectors_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
    Json(body): Json<ListVectorsBody>,
) -> ApiResult<Json<ListVectorsResponse>> {
    let idmap = load_idmap(&state, &bucket, &index).await?;
    let (page, next_cursor) = idmap.list_page(body.cursor.as_deref(), body.limit);
    let vectors = page
        .into_iter()
        .map(|r| ProjectedRow {
            key: r.key.clone(),
            distance: None,
            vector: Some(r.vector.clone()),
            metadata: Some(serde_json::Value::Object(r.metadata.clone())),
        })
        .collect();
    Ok(Json(ListVectorsResponse { vectors, next_cursor }))
}

#[derive(Deserialize)]
struct DeleteVectorsBody {
    keys: Vec<String>,
}

#[derive(Serialize)]
struct DeleteVectorsResponse {
    deleted: usize,
}

/// Tombstones keys in place against the currently committed id map.
/// This writes the id map directly rather than going through staged
/// slices — a delete is a tombstone flip, not new data the builder
/// needs to fold in (spec.md §3 "alive[i] = false is a tombstone").
async fn delete_vectors_handler(
    State(state): State<Arc<AppState>>,
    Path((bucket, index)): Path<(String, String)>,
    Json(body): Json<DeleteVectorsBody>,
) -> ApiResult<Json<DeleteVectorsResponse>> {
    let mut idmap = load_idmap(&state, &bucket, &index).await?;
    let deleted = idmap.tombstone_by_keys(&body.keys);
    let key = format!("{}/{}/{}", state.cfg.index_dir, index, state.cfg.idmap_key_name);
    let bytes = idmap.to_parquet_bytes()?;
    state.store.put_bytes(&bucket, &key, bytes).await?;
    Ok(Json(DeleteVectorsResponse { deleted }))
}
