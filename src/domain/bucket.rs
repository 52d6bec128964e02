// ============================================================
// Layer 3 — Buckets
// ============================================================
// A bucket is a size class (max source-1, max source-2, max
// target length). Examples are padded up to the capacities of
// the smallest bucket they fit into, so one batch always has a
// fixed shape.
//
// The table is ordered: every dimension is non-decreasing along
// the list and the last bucket is the largest one.

use serde::{Deserialize, Serialize};

use crate::domain::error::Seq2SeqError;
use crate::domain::example::Example;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub source_len_1: usize,
    pub source_len_2: usize,
    pub target_len:   usize,
}

impl Bucket {
    pub const fn new(source_len_1: usize, source_len_2: usize, target_len: usize) -> Self {
        Self { source_len_1, source_len_2, target_len }
    }

    /// True when every length is strictly below the matching capacity.
    pub fn fits(&self, source_1: usize, source_2: usize, target: usize) -> bool {
        source_1 < self.source_len_1
            && source_2 < self.source_len_2
            && target < self.target_len
    }
}

/// Default size classes used for training and decoding.
pub const DEFAULT_BUCKETS: [Bucket; 4] = [
    Bucket::new(5, 10, 10),
    Bucket::new(10, 15, 15),
    Bucket::new(20, 25, 25),
    Bucket::new(45, 50, 50),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Bucket>", into = "Vec<Bucket>")]
pub struct BucketTable {
    buckets: Vec<Bucket>,
}

impl BucketTable {
    pub fn new(buckets: Vec<Bucket>) -> Result<Self, Seq2SeqError> {
        if buckets.is_empty() {
            return Err(Seq2SeqError::InvalidBucketTable("no buckets".into()));
        }
        for (i, b) in buckets.iter().enumerate() {
            if b.source_len_1 == 0 || b.source_len_2 == 0 || b.target_len == 0 {
                return Err(Seq2SeqError::InvalidBucketTable(format!(
                    "bucket {i} has a zero capacity"
                )));
            }
        }
        for (i, pair) in buckets.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            if b.source_len_1 < a.source_len_1
                || b.source_len_2 < a.source_len_2
                || b.target_len < a.target_len
            {
                return Err(Seq2SeqError::InvalidBucketTable(format!(
                    "bucket {} is smaller than bucket {i} in some dimension",
                    i + 1
                )));
            }
        }
        Ok(Self { buckets })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    pub fn get(&self, bucket_id: usize) -> Result<Bucket, Seq2SeqError> {
        self.buckets
            .get(bucket_id)
            .copied()
            .ok_or(Seq2SeqError::UnknownBucket { bucket_id, count: self.buckets.len() })
    }

    /// The maximum-capacity bucket (always the last one)
    pub fn largest(&self) -> Bucket {
        self.buckets[self.buckets.len() - 1]
    }

    /// First bucket that strictly dominates all three lengths of
    /// the example, or None when the example is too long for the
    /// whole table and has to be dropped.
    pub fn assign(&self, example: &Example) -> Option<usize> {
        let (s1, s2, t) = example.lengths();
        self.buckets.iter().position(|b| b.fits(s1, s2, t))
    }

    /// Bucket selection for decoding, where only the sources are
    /// known. Falls back to the largest bucket when nothing fits.
    pub fn select_for_sources(&self, source_1: usize, source_2: usize) -> usize {
        self.buckets
            .iter()
            .position(|b| source_1 < b.source_len_1 && source_2 < b.source_len_2)
            .unwrap_or(self.buckets.len() - 1)
    }
}

impl Default for BucketTable {
    fn default() -> Self {
        Self { buckets: DEFAULT_BUCKETS.to_vec() }
    }
}

impl TryFrom<Vec<Bucket>> for BucketTable {
    type Error = Seq2SeqError;

    fn try_from(buckets: Vec<Bucket>) -> Result<Self, Self::Error> {
        Self::new(buckets)
    }
}

impl From<BucketTable> for Vec<Bucket> {
    fn from(table: BucketTable) -> Self {
        table.buckets
    }
}
