//! ANN Backends (spec.md §4.5).
//!
//! A uniform contract two algorithms sit behind: a graph (HNSW-style)
//! backend and an IVF-PQ backend, selected by a hybrid size policy.

pub mod graph;
pub mod ivfpq;

use crate::error::Result;
use crate::models::{Algorithm, Metric};

/// Sentinel id the backend pads a short result with (spec.md §4.5).
pub const SENTINEL_ID: i64 = -1;

/// One ranked candidate. Distances are always smaller-is-better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub id: i64,
    pub distance: f32,
}

/// Common contract both ANN algorithms implement (spec.md §4.5).
pub trait Backend: Send + Sync {
    /// Train (if needed) and index `(id, vector)` pairs from scratch.
    fn build(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()>;

    /// Extend an already-built index with more vectors. For backends
    /// that cannot mutate in place, this may rebuild internally from
    /// the full accumulated point set (documented per-backend).
    fn add(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()>;

    /// Exactly `topK` candidates, padded with `SENTINEL_ID` if fewer
    /// are available. `nprobe` is advisory and ignored by backends that
    /// don't use it.
    fn search(&self, query: &[f32], top_k: usize, nprobe: Option<usize>) -> Vec<Hit>;

    fn save(&self) -> Result<Vec<u8>>;

    fn algorithm(&self) -> Algorithm;
}

/// `graph` while `vector_count < threshold`, else `ivfpq` — decided
/// once per build (spec.md §4.5's hybrid policy, §9's threshold
/// decision recorded in DESIGN.md).
pub fn choose_algorithm(configured: Algorithm, vector_count: usize, threshold: usize) -> Algorithm {
    match configured {
        Algorithm::Graph => Algorithm::Graph,
        Algorithm::Ivfpq => Algorithm::Ivfpq,
        Algorithm::Hybrid => {
            if vector_count < threshold {
                Algorithm::Graph
            } else {
                Algorithm::Ivfpq
            }
        }
    }
}

/// L2-normalize a vector in place — cosine is inner-product on
/// normalized vectors in both backends (spec.md §4.5, DESIGN.md Open
/// Question #1).
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// File extension a backend's saved blob is stored under
/// (`index.<ext>`, spec.md §6), matching `indexer.py::_store_index`'s
/// algorithm-specific extension.
pub fn algo_extension(algo: Algorithm) -> &'static str {
    match algo {
        Algorithm::Graph => "hnsw",
        Algorithm::Ivfpq => "faiss",
        Algorithm::Hybrid => unreachable!("manifest always records a concrete algorithm"),
    }
}

/// Deserialize the right backend for a manifest's recorded algorithm
/// (spec.md §4.7 step 2).
pub fn load_backend(algo: Algorithm, bytes: &[u8]) -> Result<Box<dyn Backend>> {
    match algo {
        Algorithm::Graph => Ok(Box::new(graph::GraphBackend::load(bytes)?)),
        Algorithm::Ivfpq => Ok(Box::new(ivfpq::IvfPqBackend::load(bytes)?)),
        Algorithm::Hybrid => unreachable!("manifest always records a concrete algorithm"),
    }
}

pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Euclidean => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>(),
        Metric::Cosine => {
            let mut an = a.to_vec();
            let mut bn = b.to_vec();
            normalize(&mut an);
            normalize(&mut bn);
            let dot: f32 = an.iter().zip(bn.iter()).map(|(x, y)| x * y).sum();
            1.0 - dot
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hybrid_picks_graph_below_threshold() {
        assert_eq!(choose_algorithm(Algorithm::Hybrid, 50, 100), Algorithm::Graph);
        assert_eq!(choose_algorithm(Algorithm::Hybrid, 150, 100), Algorithm::Ivfpq);
    }

    #[test]
    fn explicit_algorithm_choice_is_never_overridden() {
        assert_eq!(choose_algorithm(Algorithm::Graph, 1_000_000, 100), Algorithm::Graph);
        assert_eq!(choose_algorithm(Algorithm::Ivfpq, 1, 100), Algorithm::Ivfpq);
    }

    #[test]
    fn euclidean_distance_is_squared_l2() {
        let d = distance(Metric::Euclidean, &[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 25.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_of_identical_direction_is_zero() {
        let d = distance(Metric::Cosine, &[1.0, 1.0], &[2.0, 2.0]);
        assert!(d.abs() < 1e-5);
    }
}
