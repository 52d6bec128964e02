// ============================================================
// Layer 3 — Example Domain Type
// ============================================================
// One parallel training example: two source sequences and one
// target sequence of token ids. Every sequence is capped at
// MAX_RAW_LEN raw tokens and then terminated with EOS.
//
// Reserved ids are shared by all three vocabularies:
//   0 = PAD, 1 = GO, 2 = EOS, 3 = UNK

use serde::{Deserialize, Serialize};

pub const PAD_ID: u32 = 0;
pub const GO_ID:  u32 = 1;
pub const EOS_ID: u32 = 2;
pub const UNK_ID: u32 = 3;

/// Hard cap on raw tokens per sequence; extra tokens are dropped.
pub const MAX_RAW_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub source_1: Vec<u32>,
    pub source_2: Vec<u32>,
    pub target:   Vec<u32>,
}

impl Example {
    pub fn new(source_1: Vec<u32>, source_2: Vec<u32>, target: Vec<u32>) -> Self {
        Self { source_1, source_2, target }
    }

    /// Build an example from raw id sequences: truncate each to
    /// MAX_RAW_LEN tokens and append EOS.
    pub fn from_raw(source_1: &[u32], source_2: &[u32], target: &[u32]) -> Self {
        Self {
            source_1: cap_and_terminate(source_1),
            source_2: cap_and_terminate(source_2),
            target:   cap_and_terminate(target),
        }
    }

    /// (source-1, source-2, target) lengths, used for bucket assignment
    pub fn lengths(&self) -> (usize, usize, usize) {
        (self.source_1.len(), self.source_2.len(), self.target.len())
    }
}

fn cap_and_terminate(ids: &[u32]) -> Vec<u32> {
    let keep = ids.len().min(MAX_RAW_LEN);
    let mut out = Vec::with_capacity(keep + 1);
    out.extend_from_slice(&ids[..keep]);
    out.push(EOS_ID);
    out
}
