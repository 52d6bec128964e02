// ============================================================
// Layer 3 — Domain Errors
// ============================================================
// Configuration and shape errors raised by the core. These are
// fail-fast conditions: the caller gets the expected and actual
// sizes and the run stops.
//
// Workflow code (Layers 1, 2 and 6) wraps these in anyhow::Error
// automatically through the `?` operator.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Seq2SeqError {
    /// A step was fed a sequence whose length disagrees with the bucket
    #[error("{stream} length must be equal to the one in bucket, {actual} != {expected}")]
    LengthMismatch {
        stream:   &'static str,
        expected: usize,
        actual:   usize,
    },

    #[error("bucket {bucket_id} does not exist (table has {count} buckets)")]
    UnknownBucket { bucket_id: usize, count: usize },

    #[error("bucket {0} has no examples to sample from")]
    EmptyBucket(usize),

    #[error("invalid bucket table: {0}")]
    InvalidBucketTable(String),

    /// An example handed to the batch builder does not fit its bucket
    #[error("{stream} of length {length} does not fit bucket capacity {capacity}")]
    ExampleTooLong {
        stream:   &'static str,
        length:   usize,
        capacity: usize,
    },

    #[error("output projection of {hidden_units} hidden units cannot be halved to a projection size")]
    ProjectionMismatch { hidden_units: usize },

    #[error("{hidden_units} hidden units are not divisible by {num_heads} attention heads")]
    HeadMismatch { hidden_units: usize, num_heads: usize },

    #[error("constant embedding '{name}' is {rows}x{dim}, expected at least {expected_rows} rows of dimension {expected_dim}")]
    EmbeddingShape {
        name:          String,
        rows:          usize,
        dim:           usize,
        expected_rows: usize,
        expected_dim:  usize,
    },

    #[error("vocabulary error: {0}")]
    Vocabulary(String),
}
