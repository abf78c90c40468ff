use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::{Distance, DocFilter, Neighbor, VectorIndex};

/// Exact-scan vector index. Correctness baseline and small-shard default; an
/// ANN adapter with the same capability set can replace it without touching
/// the shard.
pub struct FlatIndex {
    dim: usize,
    distance: Distance,
    rows: RwLock<FxHashMap<u32, Vec<f32>>>,
}

impl FlatIndex {
    pub fn new(dim: usize, distance: Distance) -> Self {
        Self {
            dim,
            distance,
            rows: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::VectorIndexFailure(format!(
                "vector dim {} does not match index dim {}",
                vector.len(),
                self.dim
            )));
        }
        Ok(())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = dot(v, v).sqrt();
    if norm <= f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

impl VectorIndex for FlatIndex {
    fn add(&self, doc_id: u32, vector: &[f32]) -> Result<()> {
        self.check_dim(vector)?;
        let stored = match self.distance {
            Distance::L2 => vector.to_vec(),
            // store normalized so the scan is a plain dot product
            Distance::NormalizedCosine => normalized(vector),
        };
        self.rows.write().insert(doc_id, stored);
        Ok(())
    }

    fn delete(&self, doc_id: u32) -> Result<()> {
        self.rows.write().remove(&doc_id);
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<DocFilter<'_>>,
    ) -> Result<Vec<Neighbor>> {
        self.check_dim(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = match self.distance {
            Distance::L2 => query.to_vec(),
            Distance::NormalizedCosine => normalized(query),
        };
        let rows = self.rows.read();
        let mut out: Vec<Neighbor> = rows
            .iter()
            .filter(|(doc_id, _)| filter.map_or(true, |keep| keep(**doc_id)))
            .map(|(doc_id, stored)| {
                let distance = match self.distance {
                    Distance::L2 => l2(&query, stored),
                    Distance::NormalizedCosine => 1.0 - dot(&query, stored),
                };
                Neighbor {
                    doc_id: *doc_id,
                    distance,
                }
            })
            .collect();
        out.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        out.truncate(k);
        Ok(out)
    }

    fn wait_until_ready(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}
