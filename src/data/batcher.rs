// ============================================================
// Layer 4 — Bucket Batcher
// ============================================================
// Turns a pool of examples into a fixed-shape Batch for one
// bucket, and a Batch into Burn tensors.
//
// Per sampled example (uniform choice, WITH replacement):
//   source-1 / source-2 → right-padded with PAD to the capacity,
//                         plus a 1/0 real-vs-pad mask
//   target              → [GO] + target + PAD * (cap - len - 1)
//
// The per-example rows are then transposed so the outer index is
// the sequence position and the inner index the batch slot.
//
// Target weights: position p counts in the loss unless it is the
// last position (nothing follows it) or the token at p + 1 is PAD.
//
// Example (target capacity 5, target = [7, 8, EOS]):
//   decoder row: [GO, 7, 8, EOS, PAD]
//   weights:     [1,  1, 1, 0,   0  ]

use burn::prelude::*;
use rand::Rng;

use crate::domain::batch::{to_slot_major, Batch};
use crate::domain::bucket::Bucket;
use crate::domain::error::Seq2SeqError;
use crate::domain::example::{Example, GO_ID, PAD_ID};

// ─── Host-side batch construction ─────────────────────────────────────────────

/// Sample `batch_size` examples from `pool` and lay them out for
/// one step on `bucket`.
pub fn build_batch<R: Rng + ?Sized>(
    pool:       &[Example],
    bucket_id:  usize,
    bucket:     &Bucket,
    batch_size: usize,
    rng:        &mut R,
) -> Result<Batch, Seq2SeqError> {
    if pool.is_empty() {
        return Err(Seq2SeqError::EmptyBucket(bucket_id));
    }

    let mut enc_rows_1 = Vec::with_capacity(batch_size);
    let mut enc_rows_2 = Vec::with_capacity(batch_size);
    let mut mask_rows_1 = Vec::with_capacity(batch_size);
    let mut mask_rows_2 = Vec::with_capacity(batch_size);
    let mut dec_rows = Vec::with_capacity(batch_size);

    for _ in 0..batch_size {
        let example = &pool[rng.gen_range(0..pool.len())];

        let (row, mask) = pad_source("Source 1", &example.source_1, bucket.source_len_1)?;
        enc_rows_1.push(row);
        mask_rows_1.push(mask);

        let (row, mask) = pad_source("Source 2", &example.source_2, bucket.source_len_2)?;
        enc_rows_2.push(row);
        mask_rows_2.push(mask);

        dec_rows.push(pad_target(&example.target, bucket.target_len)?);
    }

    let target_weights = target_weights(&dec_rows, bucket.target_len);

    Ok(Batch {
        encoder_inputs_1: transpose(&enc_rows_1, bucket.source_len_1),
        encoder_inputs_2: transpose(&enc_rows_2, bucket.source_len_2),
        encoder_mask_1:   transpose(&mask_rows_1, bucket.source_len_1),
        encoder_mask_2:   transpose(&mask_rows_2, bucket.source_len_2),
        decoder_inputs:   transpose(&dec_rows, bucket.target_len),
        target_weights,
    })
}

fn pad_source(
    stream:   &'static str,
    ids:      &[u32],
    capacity: usize,
) -> Result<(Vec<u32>, Vec<u8>), Seq2SeqError> {
    if ids.len() > capacity {
        return Err(Seq2SeqError::ExampleTooLong { stream, length: ids.len(), capacity });
    }
    let pad = capacity - ids.len();

    let mut row = ids.to_vec();
    row.resize(capacity, PAD_ID);

    let mut mask = vec![1u8; ids.len()];
    mask.extend(std::iter::repeat(0u8).take(pad));
    Ok((row, mask))
}

fn pad_target(ids: &[u32], capacity: usize) -> Result<Vec<u32>, Seq2SeqError> {
    // GO takes one slot, so the target itself gets capacity - 1
    if ids.len() + 1 > capacity {
        return Err(Seq2SeqError::ExampleTooLong {
            stream: "Target",
            length: ids.len(),
            capacity,
        });
    }
    let mut row = Vec::with_capacity(capacity);
    row.push(GO_ID);
    row.extend_from_slice(ids);
    row.resize(capacity, PAD_ID);
    Ok(row)
}

/// Weights per position, position-major. `dec_rows` is slot-major.
fn target_weights(dec_rows: &[Vec<u32>], target_len: usize) -> Vec<Vec<f32>> {
    (0..target_len)
        .map(|p| {
            dec_rows
                .iter()
                .map(|row| {
                    // The last position has no successor and never counts
                    if p + 1 == target_len {
                        return 0.0;
                    }
                    if row[p + 1] == PAD_ID { 0.0 } else { 1.0 }
                })
                .collect()
        })
        .collect()
}

/// Slot-major rows → position-major matrix
fn transpose<T: Copy>(rows: &[Vec<T>], len: usize) -> Vec<Vec<T>> {
    (0..len)
        .map(|p| rows.iter().map(|row| row[p]).collect())
        .collect()
}

// ─── Tensor conversion ────────────────────────────────────────────────────────

/// A batch as Burn tensors, all shaped `[batch_size, seq_len]`.
#[derive(Debug, Clone)]
pub struct BatchTensors<B: Backend> {
    pub source_1:        Tensor<B, 2, Int>,
    pub source_2:        Tensor<B, 2, Int>,
    /// true = padding position (masked out of attention)
    pub source_pad_1:    Tensor<B, 2, Bool>,
    pub source_pad_2:    Tensor<B, 2, Bool>,
    pub decoder_inputs:  Tensor<B, 2, Int>,
    /// Decoder inputs shifted left by one, last slot forced to PAD
    pub targets:         Tensor<B, 2, Int>,
    pub target_weights:  Tensor<B, 2>,
}

impl<B: Backend> BatchTensors<B> {
    pub fn from_batch(batch: &Batch, device: &B::Device) -> Self {
        let n = batch.batch_size();

        let targets = batch.shifted_targets(PAD_ID);
        let target_len = batch.decoder_inputs.len();

        Self {
            source_1:       int_tensor(&to_slot_major(&batch.encoder_inputs_1), device),
            source_2:       int_tensor(&to_slot_major(&batch.encoder_inputs_2), device),
            source_pad_1:   mask_tensor::<B>(&to_slot_major(&batch.encoder_mask_1), device)
                .equal_elem(0),
            source_pad_2:   mask_tensor::<B>(&to_slot_major(&batch.encoder_mask_2), device)
                .equal_elem(0),
            decoder_inputs: int_tensor(&to_slot_major(&batch.decoder_inputs), device),
            targets:        int_tensor(&targets, device),
            target_weights: Tensor::from_data(
                TensorData::new(
                    to_slot_major(&batch.target_weights).concat(),
                    [n, target_len],
                ),
                device,
            ),
        }
    }
}

fn int_tensor<B: Backend>(rows: &[Vec<u32>], device: &B::Device) -> Tensor<B, 2, Int> {
    let n = rows.len();
    let len = rows.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<i32> = rows.iter().flatten().map(|&id| id as i32).collect();
    Tensor::from_data(TensorData::new(flat, [n, len]), device)
}

fn mask_tensor<B: Backend>(rows: &[Vec<u8>], device: &B::Device) -> Tensor<B, 2, Int> {
    let n = rows.len();
    let len = rows.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<i32> = rows.iter().flatten().map(|&m| m as i32).collect();
    Tensor::from_data(TensorData::new(flat, [n, len]), device)
}
