// ============================================================
// Layer 3 — Batch Domain Type
// ============================================================
// A batch is the fixed-shape input of one step for one bucket.
// Every field is position-major: the outer Vec runs over sequence
// positions, the inner Vec over batch slots.
//
//   encoder_inputs_1[p][b]  token of slot b at source-1 position p
//   encoder_mask_1[p][b]    1 = real token, 0 = padding
//   decoder_inputs[p][b]    GO-prefixed, PAD-padded target
//   target_weights[p][b]    1.0 = counted in the loss, 0.0 = ignored
//
// Batches are built fresh for every step and dropped afterwards.

use crate::domain::bucket::Bucket;
use crate::domain::error::Seq2SeqError;

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub encoder_inputs_1: Vec<Vec<u32>>,
    pub encoder_inputs_2: Vec<Vec<u32>>,
    pub encoder_mask_1:   Vec<Vec<u8>>,
    pub encoder_mask_2:   Vec<Vec<u8>>,
    pub decoder_inputs:   Vec<Vec<u32>>,
    pub target_weights:   Vec<Vec<f32>>,
}

impl Batch {
    /// Number of batch slots
    pub fn batch_size(&self) -> usize {
        self.decoder_inputs.first().map(Vec::len).unwrap_or(0)
    }

    /// Check the step precondition: every sequence length must be
    /// exactly the bucket capacity.
    pub fn check_against(&self, bucket: &Bucket) -> Result<(), Seq2SeqError> {
        check_len("Encoder 1", self.encoder_inputs_1.len(), bucket.source_len_1)?;
        check_len("Encoder 2", self.encoder_inputs_2.len(), bucket.source_len_2)?;
        check_len("Encoder mask 1", self.encoder_mask_1.len(), bucket.source_len_1)?;
        check_len("Encoder mask 2", self.encoder_mask_2.len(), bucket.source_len_2)?;
        check_len("Decoder", self.decoder_inputs.len(), bucket.target_len)?;
        check_len("Weights", self.target_weights.len(), bucket.target_len)?;

        let n = self.batch_size();
        let rows = self.encoder_inputs_1.iter().map(Vec::len)
            .chain(self.encoder_inputs_2.iter().map(Vec::len))
            .chain(self.encoder_mask_1.iter().map(Vec::len))
            .chain(self.encoder_mask_2.iter().map(Vec::len))
            .chain(self.decoder_inputs.iter().map(Vec::len))
            .chain(self.target_weights.iter().map(Vec::len));
        for len in rows {
            check_len("Batch slot count", len, n)?;
        }
        Ok(())
    }

    /// Targets are the decoder inputs shifted one position forward.
    /// The slot after the last position does not exist, so it is
    /// forced to PAD. Returned slot-major: `[slot][position]`.
    pub fn shifted_targets(&self, pad_id: u32) -> Vec<Vec<u32>> {
        let len = self.decoder_inputs.len();
        (0..self.batch_size())
            .map(|b| {
                (0..len)
                    .map(|p| {
                        if p + 1 < len { self.decoder_inputs[p + 1][b] } else { pad_id }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Transpose a position-major matrix into slot-major rows.
pub fn to_slot_major<T: Copy>(position_major: &[Vec<T>]) -> Vec<Vec<T>> {
    let n = position_major.first().map(Vec::len).unwrap_or(0);
    (0..n)
        .map(|b| position_major.iter().map(|row| row[b]).collect())
        .collect()
}

fn check_len(stream: &'static str, actual: usize, expected: usize) -> Result<(), Seq2SeqError> {
    if actual != expected {
        return Err(Seq2SeqError::LengthMismatch { stream, expected, actual });
    }
    Ok(())
}
