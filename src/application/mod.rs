// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer wires the other layers together to accomplish one
// goal: training a model, or translating with a trained one.
//
// Rules for this layer:
//   - No tensor math or model code here (that's Layer 5)
//   - No argument parsing here (that's Layer 1)
//   - File formats belong to Layers 4 and 6
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow and the self-test
pub mod train_use_case;

// The interactive translation workflow
pub mod decode_use_case;
