// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and traits that define the core concepts:
// buckets, examples, batches and the step/tokenizer seams.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

// Size classes and first-fit assignment
pub mod bucket;

// Parallel dual-source examples and reserved token ids
pub mod example;

// Position-major step input
pub mod batch;

// Fail-fast configuration errors
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
