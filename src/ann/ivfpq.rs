//! IVF-PQ backend (spec.md §4.5) — from scratch, no existing crate
//! implements this. Ported from `examples/original_source/src/app/
//! index/ivfpq_backend.py::IVFPQSim`: a coarse IVF quantizer (k-means
//! over the full vector set) plus per-subvector product-quantization
//! codebooks, searched by probing the `nprobe` closest coarse lists and
//! ranking candidates by an asymmetric center-to-query distance.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::{Deserialize, Serialize};

use super::{normalize, Backend, Hit, SENTINEL_ID};
use crate::error::{Error, Result};
use crate::models::{Algorithm, Metric};

const KMEANS_ITERS: usize = 25;

fn sq_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Lloyd's algorithm, random-point initialization. Returns `k` centroids
/// and the cluster assignment of each input point.
fn kmeans(points: &[Vec<f32>], k: usize) -> (Vec<Vec<f32>>, Vec<usize>) {
    let k = k.min(points.len()).max(1);
    let mut rng = thread_rng();
    let mut centroids: Vec<Vec<f32>> = points
        .choose_multiple(&mut rng, k)
        .cloned()
        .collect();
    let dim = points[0].len();
    let mut assignments = vec![0usize; points.len()];

    for _ in 0..KMEANS_ITERS {
        for (i, p) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_d = f32::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = sq_euclidean(p, centroid);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            assignments[i] = best;
        }

        let mut sums = vec![vec![0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (p, &c) in points.iter().zip(assignments.iter()) {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(p.iter()) {
                *s += v;
            }
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            if counts[c] > 0 {
                for (v, s) in centroid.iter_mut().zip(sums[c].iter()) {
                    *v = s / counts[c] as f32;
                }
            }
        }
    }
    (centroids, assignments)
}

fn sub_range(dim: usize, m: usize, i: usize) -> (usize, usize) {
    let subdim = dim / m;
    (i * subdim, (i + 1) * subdim)
}

#[derive(Serialize, Deserialize, Clone)]
struct PostingList {
    codes: Vec<Vec<u16>>,
    ids: Vec<i64>,
}

pub struct IvfPqBackend {
    metric: Metric,
    nlist: usize,
    m: usize,
    nbits: usize,
    dim: Option<usize>,
    coarse_centroids: Vec<Vec<f32>>,
    codebooks: Vec<Vec<Vec<f32>>>,
    lists: HashMap<usize, PostingList>,
}

#[derive(Serialize, Deserialize)]
struct SavedIvfPq {
    metric: Metric,
    nlist: usize,
    m: usize,
    nbits: usize,
    dim: Option<usize>,
    coarse_centroids: Vec<Vec<f32>>,
    codebooks: Vec<Vec<Vec<f32>>>,
    lists: Vec<(usize, PostingList)>,
}

impl IvfPqBackend {
    pub fn new(metric: Metric, nlist: usize, m: usize, nbits: usize) -> Self {
        IvfPqBackend {
            metric,
            nlist,
            m,
            nbits,
            dim: None,
            coarse_centroids: Vec::new(),
            codebooks: Vec::new(),
            lists: HashMap::new(),
        }
    }

    fn maybe_normalize(&self, v: &[f32]) -> Vec<f32> {
        let mut out = v.to_vec();
        if self.metric == Metric::Cosine {
            normalize(&mut out);
        }
        out
    }

    fn nearest_coarse(&self, v: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_d = f32::INFINITY;
        for (i, c) in self.coarse_centroids.iter().enumerate() {
            let d = super::distance(self.metric, v, c);
            if d < best_d {
                best_d = d;
                best = i;
            }
        }
        best
    }

    fn encode(&self, v: &[f32]) -> Vec<u16> {
        let dim = self.dim.unwrap();
        (0..self.m)
            .map(|i| {
                let (s, e) = sub_range(dim, self.m, i);
                let part = &v[s..e];
                let cb = &self.codebooks[i];
                let mut best = 0usize;
                let mut best_d = f32::INFINITY;
                for (c, center) in cb.iter().enumerate() {
                    let d = sq_euclidean(part, center);
                    if d < best_d {
                        best_d = d;
                        best = c;
                    }
                }
                best as u16
            })
            .collect()
    }

    fn asymmetric_distance(&self, query: &[f32], code_row: &[u16]) -> f32 {
        let dim = self.dim.unwrap();
        let mut acc = 0f32;
        for i in 0..self.m {
            let (s, e) = sub_range(dim, self.m, i);
            let part = &query[s..e];
            let center = &self.codebooks[i][code_row[i] as usize];
            acc += match self.metric {
                Metric::Cosine => {
                    let cn = {
                        let mut c = center.clone();
                        normalize(&mut c);
                        c
                    };
                    let pn = {
                        let mut p = part.to_vec();
                        normalize(&mut p);
                        p
                    };
                    let dot: f32 = cn.iter().zip(pn.iter()).map(|(x, y)| x * y).sum();
                    1.0 - dot
                }
                Metric::Euclidean => sq_euclidean(center, part),
            };
        }
        acc
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        let saved: SavedIvfPq = serde_json::from_slice(bytes)
            .map_err(|e| Error::dependency(format!("ivfpq backend blob corrupt: {e}")))?;
        Ok(IvfPqBackend {
            metric: saved.metric,
            nlist: saved.nlist,
            m: saved.m,
            nbits: saved.nbits,
            dim: saved.dim,
            coarse_centroids: saved.coarse_centroids,
            codebooks: saved.codebooks,
            lists: saved.lists.into_iter().collect(),
        })
    }
}

impl Backend for IvfPqBackend {
    fn build(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        let dim = vectors[0].len();
        self.dim = Some(dim);
        let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| self.maybe_normalize(v)).collect();

        let nl = self.nlist.min((normalized.len() / 39).max(1));
        let (coarse_centroids, _) = kmeans(&normalized, nl);
        self.coarse_centroids = coarse_centroids;

        let subdim = dim / self.m;
        self.codebooks = (0..self.m)
            .map(|i| {
                let parts: Vec<Vec<f32>> = normalized
                    .iter()
                    .map(|v| v[i * subdim..(i + 1) * subdim].to_vec())
                    .collect();
                let k = (1usize << self.nbits).min(parts.len().max(2));
                kmeans(&parts, k).0
            })
            .collect();

        self.lists.clear();
        self.add(ids, vectors)
    }

    fn add(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        for (id, v) in ids.iter().zip(vectors.iter()) {
            let normalized = self.maybe_normalize(v);
            let coarse = self.nearest_coarse(&normalized);
            let code = self.encode(&normalized);
            let entry = self.lists.entry(coarse).or_insert_with(|| PostingList {
                codes: Vec::new(),
                ids: Vec::new(),
            });
            entry.codes.push(code);
            entry.ids.push(*id);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize, nprobe: Option<usize>) -> Vec<Hit> {
        if self.coarse_centroids.is_empty() {
            return Vec::new();
        }
        let normalized = self.maybe_normalize(query);
        let nprobe = nprobe.unwrap_or(8).min(self.coarse_centroids.len()).max(1);

        let mut coarse_order: Vec<(usize, f32)> = self
            .coarse_centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, super::distance(self.metric, &normalized, c)))
            .collect();
        coarse_order.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        let mut candidates: Vec<Hit> = Vec::new();
        for (list_id, _) in coarse_order.into_iter().take(nprobe) {
            let Some(list) = self.lists.get(&list_id) else { continue };
            for (code, id) in list.codes.iter().zip(list.ids.iter()) {
                let d = self.asymmetric_distance(&normalized, code);
                candidates.push(Hit { id: *id, distance: d });
            }
        }
        candidates.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        candidates.truncate(top_k);
        while candidates.len() < top_k {
            candidates.push(Hit { id: SENTINEL_ID, distance: f32::INFINITY });
        }
        candidates
    }

    fn save(&self) -> Result<Vec<u8>> {
        let saved = SavedIvfPq {
            metric: self.metric,
            nlist: self.nlist,
            m: self.m,
            nbits: self.nbits,
            dim: self.dim,
            coarse_centroids: self.coarse_centroids.clone(),
            codebooks: self.codebooks.clone(),
            lists: self.lists.clone().into_iter().collect(),
        };
        Ok(serde_json::to_vec(&saved)?)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Ivfpq
    }
}
