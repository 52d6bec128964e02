// ============================================================
// Layer 4 — Bucketed Dataset
// ============================================================
// One pool of examples per bucket. Training picks a bucket with
// probability proportional to its pool size, through a cumulative
// scale over [0, 1]: the first bucket whose scale exceeds a
// uniform draw wins.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::example::Example;

/// Examples partitioned into one pool per bucket index.
/// Pools only grow while the data is being read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketedDataset {
    pools: Vec<Vec<Example>>,
}

impl BucketedDataset {
    pub fn new(num_buckets: usize) -> Self {
        Self { pools: vec![Vec::new(); num_buckets] }
    }

    pub fn from_pools(pools: Vec<Vec<Example>>) -> Self {
        Self { pools }
    }

    pub fn push(&mut self, bucket_id: usize, example: Example) {
        self.pools[bucket_id].push(example);
    }

    pub fn pool(&self, bucket_id: usize) -> &[Example] {
        &self.pools[bucket_id]
    }

    pub fn num_buckets(&self) -> usize {
        self.pools.len()
    }

    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.pools.iter().map(Vec::len).collect()
    }

    pub fn total_size(&self) -> usize {
        self.pools.iter().map(Vec::len).sum()
    }

    /// Cumulative share of the data up to and including each bucket.
    /// Rises from 0 to 1; the width of interval i is proportional to
    /// the size of bucket i.
    pub fn bucket_scale(&self) -> Vec<f64> {
        let total = self.total_size() as f64;
        let mut running = 0usize;
        self.pools
            .iter()
            .map(|pool| {
                running += pool.len();
                running as f64 / total
            })
            .collect()
    }
}

/// Smallest bucket whose cumulative scale exceeds `u` (u in [0, 1)).
/// Buckets are therefore picked in proportion to their size, and
/// empty buckets are never picked.
pub fn pick_bucket(scale: &[f64], u: f64) -> usize {
    scale
        .iter()
        .position(|&s| s > u)
        .unwrap_or(scale.len().saturating_sub(1))
}

/// Draw a bucket index weighted by data mass.
pub fn sample_bucket<R: Rng + ?Sized>(scale: &[f64], rng: &mut R) -> usize {
    pick_bucket(scale, rng.gen::<f64>())
}
