// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the token-id files on disk and the
// fixed-shape batches one step consumes.
//
//   train.ids*.en_1 / .en_2 / .fr
//       │
//       ▼
//   reader            → parses aligned lines, assigns buckets
//       │
//       ▼
//   BucketedDataset   → one pool per bucket, weighted sampling
//       │
//       ▼
//   batcher           → pads, masks, GO-prefixes, transposes
//       │
//       ▼
//   BatchTensors      → Burn tensors for the step executor
//
// Each module is responsible for exactly one step.

/// Reads aligned id files and bucketizes the examples
pub mod reader;

/// Per-bucket example pools and size-weighted bucket sampling
pub mod dataset;

/// Builds padded, position-major batches for one bucket
pub mod batcher;
