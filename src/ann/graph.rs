//! Graph backend (HNSW-style), spec.md §4.5.
//!
//! Wraps `instant_distance` (teacher's own dependency, `src/indexing.rs`),
//! generalized from the teacher's fixed Euclidean-only point type to a
//! `Metric`-parameterized one. `instant_distance::HnswMap` is immutable
//! once built, so `add` rebuilds from the accumulated point set — this
//! is never observed externally because the Index Builder always
//! rebuilds from the complete ID map on every run (spec.md §4.6), never
//! calling `add` across already-committed builds.

use instant_distance::{Builder, HnswMap, Point, Search};
use serde::{Deserialize, Serialize};

use super::{distance, Backend, Hit, SENTINEL_ID};
use crate::error::{Error, Result};
use crate::models::{Algorithm, Metric};

#[derive(Clone, Debug)]
struct VectorPoint {
    values: Vec<f32>,
    metric: Metric,
}

impl Point for VectorPoint {
    fn distance(&self, other: &Self) -> f32 {
        distance(self.metric, &self.values, &other.values)
    }
}

pub struct GraphBackend {
    metric: Metric,
    points: Vec<(i64, Vec<f32>)>,
    map: Option<HnswMap<VectorPoint, i64>>,
}

#[derive(Serialize, Deserialize)]
struct SavedGraph {
    metric: Metric,
    points: Vec<(i64, Vec<f32>)>,
}

impl GraphBackend {
    pub fn new(metric: Metric) -> Self {
        GraphBackend {
            metric,
            points: Vec::new(),
            map: None,
        }
    }

    fn rebuild(&mut self) {
        if self.points.is_empty() {
            self.map = None;
            return;
        }
        let values: Vec<VectorPoint> = self
            .points
            .iter()
            .map(|(_, v)| VectorPoint { values: v.clone(), metric: self.metric })
            .collect();
        let ids: Vec<i64> = self.points.iter().map(|(id, _)| *id).collect();
        self.map = Some(Builder::default().build(values, ids));
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        let saved: SavedGraph = serde_json::from_slice(bytes)
            .map_err(|e| Error::dependency(format!("graph backend blob corrupt: {e}")))?;
        let mut backend = GraphBackend {
            metric: saved.metric,
            points: saved.points,
            map: None,
        };
        backend.rebuild();
        Ok(backend)
    }
}

impl Backend for GraphBackend {
    fn build(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        self.points = ids.iter().cloned().zip(vectors.iter().cloned()).collect();
        self.rebuild();
        Ok(())
    }

    fn add(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        self.points.extend(ids.iter().cloned().zip(vectors.iter().cloned()));
        self.rebuild();
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize, _nprobe: Option<usize>) -> Vec<Hit> {
        let map = match &self.map {
            Some(m) => m,
            None => return Vec::new(),
        };
        let query_point = VectorPoint { values: query.to_vec(), metric: self.metric };
        let mut search_state = Search::default();
        let mut hits: Vec<Hit> = map
            .search(&query_point, &mut search_state)
            .take(top_k)
            .map(|item| Hit { id: *item.value, distance: item.distance })
            .collect();
        while hits.len() < top_k {
            hits.push(Hit { id: SENTINEL_ID, distance: f32::INFINITY });
        }
        hits
    }

    fn save(&self) -> Result<Vec<u8>> {
        let saved = SavedGraph { metric: self.metric, points: self.points.clone() };
        Ok(serde_json::to_vec(&saved)?)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_neighbor_is_found() {
        let mut backend = GraphBackend::new(Metric::Euclidean);
        backend
            .build(
                &[0, 1, 2],
                &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
            )
            .unwrap();
        let hits = backend.search(&[0.9, 0.1, 0.0], 1, None);
        assert_eq!(hits[0].id, 0);
    }

    #[test]
    fn search_pads_with_sentinel_when_fewer_than_topk() {
        let mut backend = GraphBackend::new(Metric::Euclidean);
        backend.build(&[0], &[vec![1.0, 0.0]]).unwrap();
        let hits = backend.search(&[1.0, 0.0], 5, None);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].id, 0);
        assert_eq!(hits[1].id, SENTINEL_ID);
    }

    #[test]
    fn empty_index_search_returns_empty() {
        let backend = GraphBackend::new(Metric::Euclidean);
        let hits = backend.search(&[1.0, 0.0], 5, None);
        assert!(hits.is_empty());
    }

    #[test]
    fn save_load_round_trips_search_results() {
        let mut backend = GraphBackend::new(Metric::Cosine);
        backend
            .build(&[10, 20], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        let bytes = backend.save().unwrap();
        let loaded = GraphBackend::load(&bytes).unwrap();
        let hits = loaded.search(&[1.0, 0.0], 1, None);
        assert_eq!(hits[0].id, 10);
    }

    #[test]
    fn add_extends_the_existing_point_set() {
        let mut backend = GraphBackend::new(Metric::Euclidean);
        backend.build(&[0], &[vec![1.0, 0.0]]).unwrap();
        backend.add(&[1], &[vec![0.0, 1.0]]).unwrap();
        let hits = backend.search(&[0.0, 0.9], 1, None);
        assert_eq!(hits[0].id, 1);
    }
}
