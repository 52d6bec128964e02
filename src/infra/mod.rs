// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the concerns that touch the file system:
//
//   checkpoint.rs  — Model snapshots
//                    Uses Burn's full-precision MessagePack recorder
//                    to save parameters per global step, keeps an index
//                    of snapshots with their counters, and
//                    saves/loads TrainConfig as JSON so decoding
//                    can rebuild the model.
//
//   vocabulary.rs  — Token ↔ id conversion
//                    Builds a word-level tokenizer from a
//                    one-token-per-line vocabulary file.
//
//   embeddings.rs  — Constant source embedding tables
//                    Loaded once, never trained.
//
//   metrics.rs     — Training metrics logging
//                    One CSV row per checkpoint with train and
//                    per-bucket eval perplexity.

/// Model snapshot saving and loading
pub mod checkpoint;

/// Vocabulary files behind the TokenBridge trait
pub mod vocabulary;

/// Externally supplied embedding tables
pub mod embeddings;

/// Checkpoint metrics CSV logger
pub mod metrics;
