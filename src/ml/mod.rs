// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn model and optimisation code lives here.
//
// What's in this layer:
//
//   model.rs     — The dual-source attention encoder-decoder
//                  • constant (frozen) source embeddings
//                  • one Transformer encoder per source stream
//                  • decoder with causal self-attention and
//                    cross-attention over both encoders
//                  • bottleneck + output projection (frozen bias)
//                  • weighted sequence loss, sampled softmax
//
//   clipping.rs  — Global-norm gradient clipping
//
//   search.rs    — Beam search over output sequences
//
//   executor.rs  — The StepExecutor over the Burn model:
//                  train steps, infer steps, snapshots
//
//   trainer.rs   — The bucketed training loop with checkpoint
//                  statistics, learning-rate decay and evals
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need

/// Dual-source Transformer seq2seq architecture
pub mod model;

/// Clip gradients by their global norm
pub mod clipping;

/// Beam search decoding
pub mod search;

/// Step executor backed by Burn
pub mod executor;

/// Step-based training loop over buckets
pub mod trainer;
