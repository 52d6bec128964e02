// ============================================================
// Layer 5 — Dual-Source Attention Seq2Seq Model
// ============================================================
// One parameter set shared by every bucket; only the sequence
// lengths of the tensors fed in differ between buckets.
//
//   source-1 ids → constant embedding → Linear → + position → Encoder 1 ─┐
//                                                                         ├─ memory
//   source-2 ids → constant embedding → Linear → + position → Encoder 2 ─┘  (concatenated)
//
//   decoder ids  → target embedding + position
//                → [causal self-attention → cross-attention(memory) → FFN] × N
//                → LayerNorm → bottleneck (hidden / 2) → output projection
//
// The two source embedding tables are supplied from outside and
// never trained. The output projection bias starts at zero and is
// frozen as well, so only its weight learns.
//
// Shapes use [batch, seq_len, hidden] throughout.

use burn::{
    module::Param,
    nn::{
        attention::{
            generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig,
        },
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation,
};
use rand::Rng;

use crate::data::batcher::BatchTensors;
use crate::domain::error::Seq2SeqError;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct Seq2SeqConfig {
    pub source_vocab_size_1: usize,
    pub source_vocab_size_2: usize,
    pub target_vocab_size:   usize,
    /// Width of the constant source embeddings
    pub embedding_dim:       usize,
    pub hidden_units:        usize,
    pub num_layers:          usize,
    pub num_heads:           usize,
    /// Longest sequence any bucket can feed in
    pub max_seq_len:         usize,
    #[config(default = 0.2)]
    pub dropout:             f64,
}

impl Seq2SeqConfig {
    /// Size of the decoder output fed to the output projection
    pub fn projection_dim(&self) -> usize {
        self.hidden_units / 2
    }

    pub fn validate(&self) -> Result<(), Seq2SeqError> {
        if self.hidden_units < 2 || self.hidden_units % 2 != 0 {
            return Err(Seq2SeqError::ProjectionMismatch { hidden_units: self.hidden_units });
        }
        if self.num_heads == 0 || self.hidden_units % self.num_heads != 0 {
            return Err(Seq2SeqError::HeadMismatch {
                hidden_units: self.hidden_units,
                num_heads:    self.num_heads,
            });
        }
        Ok(())
    }

    /// Build the model around the two constant source embeddings.
    /// Fails fast on inconsistent sizes.
    pub fn init<B: Backend>(
        &self,
        embedding_1: Tensor<B, 2>,
        embedding_2: Tensor<B, 2>,
        device:      &B::Device,
    ) -> Result<DualSourceSeq2Seq<B>, Seq2SeqError> {
        self.validate()?;
        check_embedding("source-1", &embedding_1, self.source_vocab_size_1, self.embedding_dim)?;
        check_embedding("source-2", &embedding_2, self.source_vocab_size_2, self.embedding_dim)?;

        let h = self.hidden_units;

        let mut output_projection =
            LinearConfig::new(self.projection_dim(), self.target_vocab_size).init(device);
        output_projection.bias = Some(
            Param::from_tensor(Tensor::zeros([self.target_vocab_size], device))
                .set_require_grad(false),
        );

        Ok(DualSourceSeq2Seq {
            source_embedding_1: constant_embedding(embedding_1),
            source_embedding_2: constant_embedding(embedding_2),
            source_input_1:     LinearConfig::new(self.embedding_dim, h).init(device),
            source_input_2:     LinearConfig::new(self.embedding_dim, h).init(device),
            target_embedding:   EmbeddingConfig::new(self.target_vocab_size, h).init(device),
            position_embedding: EmbeddingConfig::new(self.max_seq_len, h).init(device),
            encoder_1: (0..self.num_layers).map(|_| self.build_encoder_block(device)).collect(),
            encoder_2: (0..self.num_layers).map(|_| self.build_encoder_block(device)).collect(),
            decoder:   (0..self.num_layers).map(|_| self.build_decoder_block(device)).collect(),
            final_norm:  LayerNormConfig::new(h).init(device),
            bottleneck:  LinearConfig::new(h, self.projection_dim()).init(device),
            output_projection,
            dropout:     DropoutConfig::new(self.dropout).init(),
        })
    }

    fn attention<B: Backend>(&self, device: &B::Device) -> MultiHeadAttention<B> {
        MultiHeadAttentionConfig::new(self.hidden_units, self.num_heads)
            .with_dropout(self.dropout)
            .init(device)
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let h = self.hidden_units;
        EncoderBlock {
            self_attn:   self.attention(device),
            ffn_linear1: LinearConfig::new(h, 2 * h).init(device),
            ffn_linear2: LinearConfig::new(2 * h, h).init(device),
            norm1:       LayerNormConfig::new(h).init(device),
            norm2:       LayerNormConfig::new(h).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
        }
    }

    fn build_decoder_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let h = self.hidden_units;
        DecoderBlock {
            self_attn:   self.attention(device),
            cross_attn:  self.attention(device),
            ffn_linear1: LinearConfig::new(h, 2 * h).init(device),
            ffn_linear2: LinearConfig::new(2 * h, h).init(device),
            norm1:       LayerNormConfig::new(h).init(device),
            norm2:       LayerNormConfig::new(h).init(device),
            norm3:       LayerNormConfig::new(h).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
        }
    }
}

fn check_embedding<B: Backend>(
    name:          &str,
    table:         &Tensor<B, 2>,
    expected_rows: usize,
    expected_dim:  usize,
) -> Result<(), Seq2SeqError> {
    let [rows, dim] = table.dims();
    if rows < expected_rows || dim != expected_dim {
        return Err(Seq2SeqError::EmbeddingShape {
            name: name.to_string(),
            rows,
            dim,
            expected_rows,
            expected_dim,
        });
    }
    Ok(())
}

/// Embedding layer holding a supplied, untrainable table
fn constant_embedding<B: Backend>(table: Tensor<B, 2>) -> Embedding<B> {
    let [rows, dim] = table.dims();
    let mut embedding = EmbeddingConfig::new(rows, dim).init(&table.device());
    embedding.weight = Param::from_tensor(table);
    embedding.no_grad()
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask`: [batch, seq_len], true where the token is padding
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn_output = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_pad(pad_mask))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub cross_attn:  MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub norm3:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(
        &self,
        x:           Tensor<B, 3>,
        memory:      &EncoderMemory<B>,
        causal_mask: Tensor<B, 3, Bool>,
    ) -> Tensor<B, 3> {
        // ── Masked self-attention: position t sees positions ≤ t ──────────────
        let attn_output = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_attn(causal_mask))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));

        // ── Cross-attention over both encoders, padding excluded ──────────────
        let cross_output = self
            .cross_attn
            .forward(
                MhaInput::new(x.clone(), memory.states.clone(), memory.states.clone())
                    .mask_pad(memory.pad_mask.clone()),
            )
            .context;
        let x = self.norm2.forward(x + self.dropout.forward(cross_output));

        let ffn_out = self.ffn_linear2.forward(
            activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm3.forward(x + self.dropout.forward(ffn_out))
    }
}

// ─── Encoder memory ───────────────────────────────────────────────────────────

/// Both encoders' outputs side by side: [batch, len_1 + len_2, hidden]
#[derive(Debug, Clone)]
pub struct EncoderMemory<B: Backend> {
    pub states:   Tensor<B, 3>,
    pub pad_mask: Tensor<B, 2, Bool>,
}

impl<B: Backend> EncoderMemory<B> {
    /// Memory of a single batch slot, still with a batch dim of 1
    pub fn slot(&self, index: usize) -> Self {
        let [_, len, hidden] = self.states.dims();
        Self {
            states:   self.states.clone().slice([index..index + 1, 0..len, 0..hidden]),
            pad_mask: self.pad_mask.clone().slice([index..index + 1, 0..len]),
        }
    }

    /// Repeat a single-slot memory for `count` hypotheses
    pub fn expand_to(&self, count: usize) -> Self {
        let [_, len, hidden] = self.states.dims();
        Self {
            states:   self.states.clone().expand([count, len, hidden]),
            pad_mask: self.pad_mask.clone().expand([count, len]),
        }
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct DualSourceSeq2Seq<B: Backend> {
    pub source_embedding_1: Embedding<B>,
    pub source_embedding_2: Embedding<B>,
    pub source_input_1:     Linear<B>,
    pub source_input_2:     Linear<B>,
    pub target_embedding:   Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub encoder_1:          Vec<EncoderBlock<B>>,
    pub encoder_2:          Vec<EncoderBlock<B>>,
    pub decoder:            Vec<DecoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub bottleneck:         Linear<B>,
    pub output_projection:  Linear<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> DualSourceSeq2Seq<B> {
    /// Mark the constant embeddings and the projection bias as
    /// untrainable again. Loading a record resets the flags.
    pub fn freeze_constants(mut self) -> Self {
        self.source_embedding_1 = self.source_embedding_1.no_grad();
        self.source_embedding_2 = self.source_embedding_2.no_grad();
        self.output_projection.bias = self
            .output_projection
            .bias
            .take()
            .map(|bias| bias.set_require_grad(false));
        self
    }

    pub fn target_vocab_size(&self) -> usize {
        self.output_projection.weight.dims()[1]
    }

    /// Run both encoders; the result is what the decoder attends to.
    pub fn encode(
        &self,
        source_1:     Tensor<B, 2, Int>,
        source_pad_1: Tensor<B, 2, Bool>,
        source_2:     Tensor<B, 2, Int>,
        source_pad_2: Tensor<B, 2, Bool>,
    ) -> EncoderMemory<B> {
        let states_1 = self.encode_stream(
            &self.source_embedding_1, &self.source_input_1, &self.encoder_1,
            source_1, source_pad_1.clone(),
        );
        let states_2 = self.encode_stream(
            &self.source_embedding_2, &self.source_input_2, &self.encoder_2,
            source_2, source_pad_2.clone(),
        );
        EncoderMemory {
            states:   Tensor::cat(vec![states_1, states_2], 1),
            pad_mask: Tensor::cat(vec![source_pad_1, source_pad_2], 1),
        }
    }

    fn encode_stream(
        &self,
        embedding: &Embedding<B>,
        input:     &Linear<B>,
        blocks:    &[EncoderBlock<B>],
        ids:       Tensor<B, 2, Int>,
        pad_mask:  Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len] = ids.dims();
        let device = ids.device();

        let x = input.forward(embedding.forward(ids));
        let mut x = self.dropout.forward(x + self.positions(batch_size, seq_len, &device));
        for block in blocks {
            x = block.forward(x, pad_mask.clone());
        }
        x
    }

    // Self-attention is permutation-invariant, so position must be injected explicitly.
    fn positions(&self, batch_size: usize, seq_len: usize, device: &B::Device) -> Tensor<B, 3> {
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        self.position_embedding.forward(positions)
    }

    /// decoder_inputs: [batch, len] → [batch, len, hidden / 2]
    pub fn decode(&self, memory: &EncoderMemory<B>, decoder_inputs: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = decoder_inputs.dims();
        let device = decoder_inputs.device();

        let x = self.target_embedding.forward(decoder_inputs);
        let mut x = self.dropout.forward(x + self.positions(batch_size, seq_len, &device));

        let causal_mask = generate_autoregressive_mask::<B>(batch_size, seq_len, &device);
        for block in &self.decoder {
            x = block.forward(x, memory, causal_mask.clone());
        }
        self.bottleneck.forward(self.final_norm.forward(x))
    }

    /// Full-vocabulary logits: [batch, len, target_vocab]
    pub fn forward(&self, batch: &BatchTensors<B>) -> Tensor<B, 3> {
        let memory = self.encode(
            batch.source_1.clone(), batch.source_pad_1.clone(),
            batch.source_2.clone(), batch.source_pad_2.clone(),
        );
        let projected = self.decode(&memory, batch.decoder_inputs.clone());
        self.output_projection.forward(projected)
    }

    /// Weighted cross-entropy over the whole target vocabulary
    pub fn full_loss(&self, batch: &BatchTensors<B>) -> (Tensor<B, 1>, Tensor<B, 3>) {
        let logits = self.forward(batch);
        let loss = weighted_sequence_loss(
            logits.clone(),
            batch.targets.clone(),
            batch.target_weights.clone(),
        );
        (loss, logits)
    }

    /// Weighted cross-entropy restricted to a candidate subset of
    /// the target vocabulary (sampled softmax).
    pub fn sampled_loss(&self, batch: &BatchTensors<B>, candidates: &CandidateTensors<B>) -> Tensor<B, 1> {
        let memory = self.encode(
            batch.source_1.clone(), batch.source_pad_1.clone(),
            batch.source_2.clone(), batch.source_pad_2.clone(),
        );
        let projected = self.decode(&memory, batch.decoder_inputs.clone());
        let [batch_size, seq_len, proj_dim] = projected.dims();
        let num_candidates = candidates.ids.dims()[0];

        // Linear weight is [d_in, d_out]: pick the candidate columns
        let weight = self.output_projection.weight.val().select(1, candidates.ids.clone());
        let mut logits = projected.reshape([batch_size * seq_len, proj_dim]).matmul(weight);
        if let Some(bias) = &self.output_projection.bias {
            logits = logits + bias.val().select(0, candidates.ids.clone()).unsqueeze::<2>();
        }

        weighted_sequence_loss(
            logits.reshape([batch_size, seq_len, num_candidates]),
            candidates.targets.clone(),
            batch.target_weights.clone(),
        )
    }

    /// Log-probabilities of the next token after each prefix.
    /// `memory` must hold a single slot; prefixes: [k, len] → [k, vocab]
    pub fn next_token_log_probs(&self, memory: &EncoderMemory<B>, prefixes: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let [count, seq_len] = prefixes.dims();
        let memory = memory.expand_to(count);
        let logits = self.output_projection.forward(self.decode(&memory, prefixes));
        let vocab = logits.dims()[2];
        let last = logits
            .slice([0..count, seq_len - 1..seq_len, 0..vocab])
            .reshape([count, vocab]);
        activation::log_softmax(last, 1)
    }
}

// ─── Loss ─────────────────────────────────────────────────────────────────────

/// Per example: Σ w·nll / (Σ w + 1e-12); then the batch mean.
/// logits: [batch, len, classes], targets and weights: [batch, len]
pub fn weighted_sequence_loss<B: Backend>(
    logits:  Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
    weights: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [batch_size, seq_len, classes] = logits.dims();

    let log_probs = activation::log_softmax(logits.reshape([batch_size * seq_len, classes]), 1);
    let picked = log_probs.gather(1, targets.reshape([batch_size * seq_len, 1]));
    let nll = picked.reshape([batch_size, seq_len]).neg();

    let per_example = (nll * weights.clone()).sum_dim(1) / (weights.sum_dim(1) + 1e-12);
    per_example.mean()
}

// ─── Sampled softmax candidates ───────────────────────────────────────────────

/// Candidate classes for one sampled-softmax step, host side.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    /// Target-vocabulary ids scored in this step; batch targets first
    pub ids:     Vec<u32>,
    /// Each batch target replaced by its index in `ids`, slot-major
    pub targets: Vec<Vec<u32>>,
}

/// Every id occurring in `targets`, topped up with uniformly drawn
/// negatives until `num_samples` classes (capped at the vocabulary).
pub fn sample_candidates<R: Rng + ?Sized>(
    targets:     &[Vec<u32>],
    vocab_size:  usize,
    num_samples: usize,
    rng:         &mut R,
) -> Result<CandidateSet, Seq2SeqError> {
    let mut index = vec![usize::MAX; vocab_size];
    let mut ids = Vec::new();

    for &id in targets.iter().flatten() {
        let slot = index.get_mut(id as usize).ok_or_else(|| {
            Seq2SeqError::Vocabulary(format!("target id {id} outside vocabulary of {vocab_size}"))
        })?;
        if *slot == usize::MAX {
            *slot = ids.len();
            ids.push(id);
        }
    }

    let wanted = num_samples.max(ids.len()).min(vocab_size);
    while ids.len() < wanted {
        let id = rng.gen_range(0..vocab_size);
        if index[id] == usize::MAX {
            index[id] = ids.len();
            ids.push(id as u32);
        }
    }

    let targets = targets
        .iter()
        .map(|row| row.iter().map(|&id| index[id as usize] as u32).collect())
        .collect();
    Ok(CandidateSet { ids, targets })
}

#[derive(Debug, Clone)]
pub struct CandidateTensors<B: Backend> {
    pub ids:     Tensor<B, 1, Int>,
    pub targets: Tensor<B, 2, Int>,
}

impl CandidateSet {
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> CandidateTensors<B> {
        let rows = self.targets.len();
        let len = self.targets.first().map(Vec::len).unwrap_or(0);
        let ids: Vec<i32> = self.ids.iter().map(|&id| id as i32).collect();
        let targets: Vec<i32> = self.targets.iter().flatten().map(|&t| t as i32).collect();
        CandidateTensors {
            ids:     Tensor::from_data(TensorData::new(ids, [self.ids.len()]), device),
            targets: Tensor::from_data(TensorData::new(targets, [rows, len]), device),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::build_batch;
    use crate::domain::bucket::Bucket;
    use crate::domain::example::Example;
    use burn::backend::NdArray;
    use rand::{rngs::StdRng, SeedableRng};

    type B = NdArray;

    fn config() -> Seq2SeqConfig {
        Seq2SeqConfig::new(10, 12, 9, 6, 8, 1, 2, 8).with_dropout(0.0)
    }

    fn tables(device: &<B as Backend>::Device) -> (Tensor<B, 2>, Tensor<B, 2>) {
        (
            Tensor::ones([10, 6], device),
            Tensor::ones([12, 6], device),
        )
    }

    fn batch(device: &<B as Backend>::Device) -> BatchTensors<B> {
        let pool = vec![
            Example::from_raw(&[4, 5], &[6], &[7, 8]),
            Example::from_raw(&[9], &[11, 4], &[5]),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let batch = build_batch(&pool, 0, &Bucket::new(4, 5, 6), 3, &mut rng).unwrap();
        BatchTensors::from_batch(&batch, device)
    }

    #[test]
    fn test_config_rejects_odd_hidden_units() {
        let device = Default::default();
        let (e1, e2) = tables(&device);
        let cfg = Seq2SeqConfig::new(10, 12, 9, 6, 7, 1, 1, 8);
        assert_eq!(
            cfg.init::<B>(e1, e2, &device).unwrap_err(),
            Seq2SeqError::ProjectionMismatch { hidden_units: 7 }
        );
    }

    #[test]
    fn test_config_rejects_head_mismatch() {
        let cfg = Seq2SeqConfig::new(10, 12, 9, 6, 10, 1, 4, 8);
        assert!(matches!(cfg.validate(), Err(Seq2SeqError::HeadMismatch { .. })));
    }

    #[test]
    fn test_config_rejects_small_embedding_table() {
        let device = Default::default();
        let small: Tensor<B, 2> = Tensor::ones([5, 6], &device);
        let (_, e2) = tables(&device);
        let err = config().init::<B>(small, e2, &device).unwrap_err();
        assert!(matches!(err, Seq2SeqError::EmbeddingShape { rows: 5, expected_rows: 10, .. }));
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let (e1, e2) = tables(&device);
        let model = config().init::<B>(e1, e2, &device).unwrap();
        let logits = model.forward(&batch(&device));
        assert_eq!(logits.dims(), [3, 6, 9]);
    }

    #[test]
    fn test_losses_are_finite_and_positive() {
        let device = Default::default();
        let (e1, e2) = tables(&device);
        let model = config().init::<B>(e1, e2, &device).unwrap();
        let batch = batch(&device);

        let (loss, _) = model.full_loss(&batch);
        let full: f32 = loss.into_scalar().elem();
        assert!(full.is_finite() && full > 0.0);

        let targets: Vec<Vec<u32>> = batch
            .targets
            .clone()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap()
            .chunks(6)
            .map(|row| row.iter().map(|&t| t as u32).collect())
            .collect();
        let mut rng = StdRng::seed_from_u64(2);
        let candidates = sample_candidates(&targets, 9, 6, &mut rng).unwrap();
        let sampled: f32 = model
            .sampled_loss(&batch, &candidates.to_tensors(&device))
            .into_scalar()
            .elem();
        assert!(sampled.is_finite() && sampled > 0.0);
        // Fewer competing classes can only lower the loss
        assert!(sampled <= full + 1e-4);
    }

    #[test]
    fn test_weighted_loss_ignores_zero_weights() {
        let device = Default::default();
        // Position 1 is confidently wrong but has weight 0
        let logits = Tensor::<B, 3>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 10.0, -10.0], [1, 2, 2]),
            &device,
        );
        let targets = Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i32, 1], [1, 2]), &device);
        let weights = Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [1, 2]), &device);
        let loss: f32 = weighted_sequence_loss(logits, targets, weights).into_scalar().elem();
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-4);
    }

    #[test]
    fn test_next_token_log_probs_normalised() {
        let device = Default::default();
        let (e1, e2) = tables(&device);
        let model = config().init::<B>(e1, e2, &device).unwrap();
        let batch = batch(&device);
        let memory = model
            .encode(batch.source_1, batch.source_pad_1, batch.source_2, batch.source_pad_2)
            .slot(1);
        let prefixes = Tensor::<B, 2, Int>::from_data(
            TensorData::new(vec![1i32, 4, 1, 5], [2, 2]),
            &device,
        );
        let log_probs = model.next_token_log_probs(&memory, prefixes);
        assert_eq!(log_probs.dims(), [2, 9]);
        let sums = log_probs.exp().sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_candidates_keep_targets_and_fill_up() {
        let mut rng = StdRng::seed_from_u64(3);
        let targets = vec![vec![7, 2, 0], vec![7, 5, 0]];
        let set = sample_candidates(&targets, 100, 10, &mut rng).unwrap();

        assert_eq!(set.ids.len(), 10);
        assert_eq!(&set.ids[..4], &[7, 2, 0, 5]);
        assert_eq!(set.targets, vec![vec![0, 1, 2], vec![0, 3, 2]]);

        let mut unique = set.ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_candidates_capped_at_vocab_and_checked() {
        let mut rng = StdRng::seed_from_u64(4);
        let set = sample_candidates(&[vec![1, 2]], 5, 50, &mut rng).unwrap();
        assert_eq!(set.ids.len(), 5);
        assert!(sample_candidates(&[vec![9]], 5, 3, &mut rng).is_err());
    }
}
