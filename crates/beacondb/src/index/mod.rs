//! Vector-index capability surface.
//!
//! The shard consumes a capability set, not an algorithm: `add` / `delete` /
//! `search` / `wait_until_ready`, keyed purely on docID. The ANN structure
//! behind it is pluggable; `FlatIndex` is the in-tree exact-scan adapter.

mod flat;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use flat::FlatIndex;

/// Distance function, selected at adapter construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    L2,
    NormalizedCosine,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub doc_id: u32,
    pub distance: f32,
}

/// Allowed-docID predicate pushed down into the adapter's scan.
pub type DocFilter<'a> = &'a (dyn Fn(u32) -> bool + Sync);

pub trait VectorIndex: Send + Sync {
    /// Idempotent on docID; a second add replaces the stored vector.
    fn add(&self, doc_id: u32, vector: &[f32]) -> Result<()>;

    /// Idempotent; deleting an unknown docID is a no-op.
    fn delete(&self, doc_id: u32) -> Result<()>;

    /// Up to `k` results in ascending distance, ties broken by docID.
    fn search(&self, query: &[f32], k: usize, filter: Option<DocFilter<'_>>)
        -> Result<Vec<Neighbor>>;

    /// Blocks until the underlying store is queryable; used during shard
    /// startup.
    fn wait_until_ready(&self, timeout: Duration) -> Result<()>;
}
