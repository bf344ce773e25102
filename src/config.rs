//! Environment-driven configuration (spec.md §6).
//!
//! Mirrors `examples/original_source/src/app/util/config.py`: every
//! tunable is an env var with a hardcoded default, loaded once at
//! startup. `.env` files are picked up via `dotenvy` the same way the
//! teacher depends on (but never wires up) `dotenvy`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceFormat {
    Parquet,
    Jsonl,
}

impl SliceFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SliceFormat::Parquet => "parquet",
            SliceFormat::Jsonl => "jsonl",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub s3_endpoint_url: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_region: String,
    /// The one physical S3 bucket this process talks to. Vector buckets
    /// (spec.md §3's `bucket` concept) are realized as key prefixes
    /// within it (see `store/mod.rs`), not as distinct physical S3
    /// buckets — a deliberate simplification vs. the single-client/
    /// many-physical-buckets model of `s3_backend.py`.
    pub s3_bucket: String,
    pub s3_bucket_prefix: String,

    pub max_batch: usize,
    pub max_topk: usize,
    pub max_dim: usize,
    pub max_filterable_bytes: usize,
    pub max_total_metadata_bytes: usize,

    pub slice_row_limit: usize,
    pub slice_age_limit_s: u64,
    pub slice_format: SliceFormat,

    pub index_dir: String,
    pub idmap_key_name: String,
    pub manifest_key_name: String,
    pub staged_dir: String,

    pub hybrid_threshold: usize,
    pub ivfpq_nlist: usize,
    pub ivfpq_m: usize,
    pub ivfpq_nbits: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,

    pub backend_cache_capacity: usize,
    pub query_over_fetch: usize,

    pub http_bind_addr: String,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the process environment, optionally
    /// seeded by a `.env` file in the current directory.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let slice_format = match env_string("SLICE_FORMAT", "parquet").as_str() {
            "jsonl" => SliceFormat::Jsonl,
            _ => SliceFormat::Parquet,
        };

        Config {
            s3_endpoint_url: env_string("S3_ENDPOINT_URL", "http://localhost:9000"),
            s3_access_key: env_string("S3_ACCESS_KEY", "minioadmin"),
            s3_secret_key: env_string("S3_SECRET_KEY", "minioadmin"),
            s3_region: env_string("S3_REGION", "us-east-1"),
            s3_bucket: env_string("S3_BUCKET", "vectorbase"),
            s3_bucket_prefix: env_string("S3_BUCKET_PREFIX", "vb-"),

            max_batch: env_parsed("MAX_BATCH", 500),
            max_topk: env_parsed("MAX_TOPK", 30),
            max_dim: env_parsed("MAX_DIM", 4096),
            max_filterable_bytes: env_parsed("MAX_FILTERABLE_BYTES", 2048),
            max_total_metadata_bytes: env_parsed("MAX_TOTAL_METADATA_BYTES", 40960),

            slice_row_limit: env_parsed("SLICE_ROW_LIMIT", 50_000),
            slice_age_limit_s: env_parsed("SLICE_AGE_LIMIT_S", 30),
            slice_format,

            index_dir: env_string("INDEX_DIR", "indexes"),
            idmap_key_name: env_string("IDMAP_KEY", "idmap.parquet"),
            manifest_key_name: env_string("MANIFEST_KEY", "manifest.json"),
            staged_dir: env_string("STAGED_DIR", "staged"),

            hybrid_threshold: env_parsed("HYBRID_THRESHOLD", 100_000),
            ivfpq_nlist: env_parsed("IVFPQ_NLIST", 100),
            ivfpq_m: env_parsed("IVFPQ_M", 8),
            ivfpq_nbits: env_parsed("IVFPQ_NBITS", 8),
            hnsw_m: env_parsed("HNSW_M", 16),
            hnsw_ef_construction: env_parsed("HNSW_EF_CONSTRUCTION", 200),

            backend_cache_capacity: env_parsed("BACKEND_CACHE_CAPACITY", 16),
            query_over_fetch: env_parsed("QUERY_OVER_FETCH", 4),

            http_bind_addr: env_string("HTTP_BIND_ADDR", "0.0.0.0:11111"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_limits() {
        std::env::remove_var("MAX_BATCH");
        std::env::remove_var("MAX_TOPK");
        std::env::remove_var("HYBRID_THRESHOLD");
        let cfg = Config::from_env();
        assert_eq!(cfg.max_batch, 500);
        assert_eq!(cfg.max_topk, 30);
        assert_eq!(cfg.max_dim, 4096);
        assert_eq!(cfg.hybrid_threshold, 100_000);
        assert_eq!(cfg.s3_bucket_prefix, "vb-");
    }
}
