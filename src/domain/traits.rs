// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The two seams between the orchestration core and the outside:
//
//   StepExecutor — runs one training or inference step on a
//                  prepared batch. The Burn implementation lives
//                  in Layer 5; tests plug in stubs.
//   TokenBridge  — maps text to token ids and back. The
//                  tokenizers-backed vocabulary lives in Layer 6.
//
// The training loop and the interactive decoder only see these
// traits, never Burn or tokenizers types.

use anyhow::Result;

use crate::domain::batch::Batch;
use crate::domain::bucket::BucketTable;

// ─── StepMode ─────────────────────────────────────────────────────────────────
/// Chosen per call by the caller; executors keep no mode state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Forward + backward + parameter update
    Train,
    /// Forward only, parameters untouched
    Infer,
}

// ─── StepOutput ───────────────────────────────────────────────────────────────
/// Per-position output of an inference step, position-major.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedOutput {
    /// Best-hypothesis symbol ids, `[position][slot]`
    Symbols(Vec<Vec<u32>>),
    /// Raw output logits, `[position][slot][vocab]`
    Logits(Vec<Vec<Vec<f32>>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Global gradient norm before clipping (train steps only)
    pub gradient_norm: Option<f64>,
    pub loss:          f64,
    /// Decoded output (inference steps only)
    pub outputs:       Option<DecodedOutput>,
}

// ─── StepExecutor ─────────────────────────────────────────────────────────────
/// Drives the differentiable engine through one step at a time.
///
/// Each call blocks until the numeric result is ready. The
/// executor owns the shared parameters, the learning rate and the
/// global step counter; only `Train` steps and
/// `decay_learning_rate` mutate them.
pub trait StepExecutor {
    /// Bucket table the per-bucket computations were built for
    fn buckets(&self) -> &BucketTable;

    /// Run one step. Fails with a length mismatch when the batch
    /// shape differs from the bucket capacities.
    fn step(&mut self, batch: &Batch, bucket_id: usize, mode: StepMode) -> Result<StepOutput>;

    fn learning_rate(&self) -> f64;

    /// Multiply the learning rate by the configured decay factor
    fn decay_learning_rate(&mut self);

    fn global_step(&self) -> u64;

    /// Persist a snapshot of the parameters and counters
    fn save_checkpoint(&mut self) -> Result<()>;
}

// ─── TokenBridge ──────────────────────────────────────────────────────────────
/// Converts between text and token ids for one vocabulary.
pub trait TokenBridge {
    /// Tokenise a sentence; unknown words map to UNK.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Whitespace-joined tokens for the given ids
    fn decode(&self, ids: &[u32]) -> String;

    fn vocab_size(&self) -> usize;
}
