// ============================================================
// Layer 5 — Burn Step Executor
// ============================================================
// Implements the StepExecutor seam on top of the Burn model.
//
// One model, one optimizer, one learning rate and one global step
// counter are shared by every bucket. A step only differs between
// buckets in the sequence lengths of the tensors fed in.
//
//   Train step:  forward → weighted loss (sampled softmax when the
//                target vocabulary is larger than the sample count)
//                → backward → global-norm clipping → Adam update
//                → global_step += 1
//
//   Infer step:  model.valid() (no autodiff, no dropout) → loss
//                → beam-searched symbols when a beam width is set,
//                  raw logits otherwise
//
// Key Burn 0.20 insight:
//   - Training uses B (Autodiff<...>) for gradients
//   - model.valid() returns the model on B::InnerBackend

use anyhow::{anyhow, Result};
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::data::batcher::BatchTensors;
use crate::domain::batch::Batch;
use crate::domain::bucket::{Bucket, BucketTable};
use crate::domain::example::{EOS_ID, GO_ID, PAD_ID};
use crate::domain::traits::{DecodedOutput, StepExecutor, StepMode, StepOutput};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::clipping::clip_by_global_norm;
use crate::ml::model::{sample_candidates, DualSourceSeq2Seq};
use crate::ml::search::BeamSearch;

/// Optimisation and decoding knobs owned by the executor
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub learning_rate:       f64,
    pub learning_rate_decay: f64,
    pub max_gradient_norm:   f64,
    /// Sampled-softmax classes per step; 0 disables sampling
    pub num_samples:         usize,
    /// Set for decoding: infer steps return beam-searched symbols
    pub beam_width:          Option<usize>,
    pub seed:                u64,
}

pub struct BurnStepExecutor<B: AutodiffBackend, O> {
    model:         DualSourceSeq2Seq<B>,
    optimizer:     O,
    buckets:       BucketTable,
    settings:      ExecutorSettings,
    learning_rate: f64,
    global_step:   u64,
    device:        B::Device,
    rng:           StdRng,
    checkpoints:   Option<CheckpointManager>,
}

impl<B, O> BurnStepExecutor<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DualSourceSeq2Seq<B>, B>,
{
    pub fn new(
        model:     DualSourceSeq2Seq<B>,
        optimizer: O,
        buckets:   BucketTable,
        settings:  ExecutorSettings,
        device:    B::Device,
    ) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            model,
            optimizer,
            buckets,
            learning_rate: settings.learning_rate,
            settings,
            global_step: 0,
            device,
            rng,
            checkpoints: None,
        }
    }

    /// Snapshots go to (and are restored from) this manager
    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    /// Restore the named snapshot, or the latest one when `name` is
    /// None. Having nothing to restore keeps the fresh parameters.
    pub fn restore(mut self, name: Option<&str>) -> Result<Self> {
        let Some(manager) = self.checkpoints.as_ref() else {
            tracing::info!("Created model with fresh parameters.");
            return Ok(self);
        };

        let meta = match name {
            Some(name) => {
                let found = manager.find(name)?;
                if found.is_none() {
                    tracing::warn!("Snapshot '{}' not found in '{}'", name, manager.dir().display());
                }
                found
            }
            None => manager.latest()?,
        };

        match meta {
            Some(meta) => {
                tracing::info!("Reading model parameters from {}", meta.name);
                self.model = manager
                    .load_model(self.model, &meta, &self.device)?
                    .freeze_constants();
                self.global_step = meta.global_step;
                self.learning_rate = meta.learning_rate;
            }
            None => tracing::info!("Created model with fresh parameters."),
        }
        Ok(self)
    }

    pub fn model(&self) -> &DualSourceSeq2Seq<B> {
        &self.model
    }

    fn uses_sampled_softmax(&self) -> bool {
        let vocab = self.model.target_vocab_size();
        self.settings.num_samples > 0 && self.settings.num_samples < vocab
    }

    // ── Train step ────────────────────────────────────────────────────────────
    fn train_step(&mut self, batch: &Batch) -> Result<StepOutput> {
        let tensors = BatchTensors::<B>::from_batch(batch, &self.device);

        let loss = if self.uses_sampled_softmax() {
            let candidates = sample_candidates(
                &batch.shifted_targets(PAD_ID),
                self.model.target_vocab_size(),
                self.settings.num_samples,
                &mut self.rng,
            )?;
            self.model.sampled_loss(&tensors, &candidates.to_tensors(&self.device))
        } else {
            self.model.full_loss(&tensors).0
        };
        let loss_value: f64 = loss.clone().into_scalar().elem::<f64>();

        // Backward pass + clipping + Adam update
        let mut grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let gradient_norm =
            clip_by_global_norm::<B, _>(&self.model, &mut grads, self.settings.max_gradient_norm);
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);
        self.global_step += 1;

        Ok(StepOutput { gradient_norm: Some(gradient_norm), loss: loss_value, outputs: None })
    }

    // ── Infer step ────────────────────────────────────────────────────────────
    fn infer_step(&self, batch: &Batch, bucket: &Bucket) -> Result<StepOutput> {
        let model = self.model.valid();
        let tensors = BatchTensors::<B::InnerBackend>::from_batch(batch, &self.device);

        let (loss, logits) = model.full_loss(&tensors);
        let loss_value: f64 = loss.into_scalar().elem::<f64>();

        let outputs = match self.settings.beam_width {
            Some(width) => DecodedOutput::Symbols(self.beam_decode(&model, &tensors, bucket, width)?),
            None        => DecodedOutput::Logits(position_major_logits(logits)?),
        };

        Ok(StepOutput { gradient_norm: None, loss: loss_value, outputs: Some(outputs) })
    }

    /// Best hypothesis per slot, PAD-padded to the target capacity,
    /// returned position-major.
    fn beam_decode(
        &self,
        model:   &DualSourceSeq2Seq<B::InnerBackend>,
        tensors: &BatchTensors<B::InnerBackend>,
        bucket:  &Bucket,
        width:   usize,
    ) -> Result<Vec<Vec<u32>>> {
        let memory = model.encode(
            tensors.source_1.clone(), tensors.source_pad_1.clone(),
            tensors.source_2.clone(), tensors.source_pad_2.clone(),
        );
        let batch_size = tensors.source_1.dims()[0];
        let search = BeamSearch::new(width, bucket.target_len, GO_ID, EOS_ID);

        let mut per_slot = Vec::with_capacity(batch_size);
        for slot in 0..batch_size {
            let slot_memory = memory.slot(slot);
            let mut tokens = search.search(|prefixes| {
                let count = prefixes.len();
                let len = prefixes.first().map(Vec::len).unwrap_or(0);
                let flat: Vec<i32> = prefixes.iter().flatten().map(|&t| t as i32).collect();
                let input = Tensor::<B::InnerBackend, 2, Int>::from_data(
                    TensorData::new(flat, [count, len]),
                    &self.device,
                );
                let log_probs = model.next_token_log_probs(&slot_memory, input);
                let vocab = log_probs.dims()[1];
                let values = log_probs
                    .into_data()
                    .convert::<f32>()
                    .to_vec::<f32>()
                    .map_err(|e| anyhow!("Cannot read log-probabilities: {e:?}"))?;
                Ok(values.chunks(vocab).map(<[f32]>::to_vec).collect())
            })?;
            tokens.resize(bucket.target_len, PAD_ID);
            per_slot.push(tokens);
        }

        Ok((0..bucket.target_len)
            .map(|p| per_slot.iter().map(|tokens| tokens[p]).collect())
            .collect())
    }
}

/// [batch, len, vocab] tensor → `[position][slot][vocab]`
fn position_major_logits<B: Backend>(logits: Tensor<B, 3>) -> Result<Vec<Vec<Vec<f32>>>> {
    let [batch_size, seq_len, vocab] = logits.dims();
    let values = logits
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Cannot read logits: {e:?}"))?;

    Ok((0..seq_len)
        .map(|p| {
            (0..batch_size)
                .map(|b| {
                    let start = (b * seq_len + p) * vocab;
                    values[start..start + vocab].to_vec()
                })
                .collect()
        })
        .collect())
}

impl<B, O> StepExecutor for BurnStepExecutor<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DualSourceSeq2Seq<B>, B>,
{
    fn buckets(&self) -> &BucketTable {
        &self.buckets
    }

    fn step(&mut self, batch: &Batch, bucket_id: usize, mode: StepMode) -> Result<StepOutput> {
        let bucket = self.buckets.get(bucket_id)?;
        batch.check_against(&bucket)?;

        match mode {
            StepMode::Train => self.train_step(batch),
            StepMode::Infer => self.infer_step(batch, &bucket),
        }
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn decay_learning_rate(&mut self) {
        self.learning_rate *= self.settings.learning_rate_decay;
    }

    fn global_step(&self) -> u64 {
        self.global_step
    }

    fn save_checkpoint(&mut self) -> Result<()> {
        match &self.checkpoints {
            Some(manager) => {
                let meta = manager.save_model(&self.model, self.global_step, self.learning_rate)?;
                tracing::debug!("Checkpoint '{}' written", meta.name);
            }
            None => tracing::debug!("No train directory configured, checkpoint skipped"),
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::build_batch;
    use crate::domain::error::Seq2SeqError;
    use crate::domain::example::Example;
    use crate::ml::model::Seq2SeqConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamConfig;

    type B = Autodiff<NdArray>;

    fn buckets() -> BucketTable {
        BucketTable::new(vec![Bucket::new(3, 3, 4), Bucket::new(5, 5, 6)]).unwrap()
    }

    fn settings(num_samples: usize, beam_width: Option<usize>) -> ExecutorSettings {
        ExecutorSettings {
            learning_rate:       0.01,
            learning_rate_decay: 0.5,
            max_gradient_norm:   1.0,
            num_samples,
            beam_width,
            seed:                5,
        }
    }

    fn executor(
        num_samples: usize,
        beam_width:  Option<usize>,
    ) -> BurnStepExecutor<B, impl Optimizer<DualSourceSeq2Seq<B>, B>> {
        let device = Default::default();
        let cfg = Seq2SeqConfig::new(8, 8, 10, 4, 8, 1, 2, 6).with_dropout(0.0);
        let model = cfg
            .init::<B>(Tensor::ones([8, 4], &device), Tensor::ones([8, 4], &device), &device)
            .unwrap();
        let optimizer = AdamConfig::new().init::<B, DualSourceSeq2Seq<B>>();
        BurnStepExecutor::new(model, optimizer, buckets(), settings(num_samples, beam_width), device)
    }

    fn batch(bucket_id: usize) -> Batch {
        let pool = vec![
            Example::from_raw(&[4], &[5], &[6]),
            Example::from_raw(&[4, 7], &[5], &[6, 9]),
        ];
        let bucket = buckets().get(bucket_id).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        build_batch(&pool, bucket_id, &bucket, 2, &mut rng).unwrap()
    }

    #[test]
    fn test_train_step_updates_counter_and_reports_norm() {
        let mut exec = executor(0, None);
        let out = exec.step(&batch(1), 1, StepMode::Train).unwrap();
        assert!(out.loss.is_finite() && out.loss > 0.0);
        assert!(out.gradient_norm.unwrap() > 0.0);
        assert!(out.outputs.is_none());
        assert_eq!(exec.global_step(), 1);
    }

    #[test]
    fn test_sampled_softmax_train_step() {
        let mut exec = executor(5, None);
        assert!(exec.uses_sampled_softmax());
        let out = exec.step(&batch(0), 0, StepMode::Train).unwrap();
        assert!(out.loss.is_finite());
    }

    #[test]
    fn test_constants_stay_frozen() {
        let mut exec = executor(0, None);
        let weights = |exec: &BurnStepExecutor<B, _>| {
            exec.model().source_embedding_1.weight.val().into_data().to_vec::<f32>().unwrap()
        };
        let before = weights(&exec);
        for _ in 0..3 {
            exec.step(&batch(1), 1, StepMode::Train).unwrap();
        }
        assert_eq!(before, weights(&exec));

        let bias = exec.model().output_projection.bias.as_ref().unwrap().val();
        let max_abs: f32 = bias.abs().max().into_scalar().elem();
        assert_eq!(max_abs, 0.0);
    }

    #[test]
    fn test_infer_step_is_read_only() {
        let mut exec = executor(0, None);
        let out = exec.step(&batch(0), 0, StepMode::Infer).unwrap();
        assert_eq!(exec.global_step(), 0);
        assert!(out.gradient_norm.is_none());
        match out.outputs {
            Some(DecodedOutput::Logits(logits)) => {
                assert_eq!(logits.len(), 4);
                assert_eq!(logits[0].len(), 2);
                assert_eq!(logits[0][0].len(), 10);
            }
            other => panic!("expected logits, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_mode_returns_padded_symbols() {
        for width in [1, 3] {
            let mut exec = executor(0, Some(width));
            let out = exec.step(&batch(1), 1, StepMode::Infer).unwrap();
            match out.outputs {
                Some(DecodedOutput::Symbols(symbols)) => {
                    assert_eq!(symbols.len(), 6);
                    assert!(symbols.iter().all(|row| row.len() == 2));
                    assert!(symbols.iter().flatten().all(|&t| t < 10));
                }
                other => panic!("expected symbols, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut exec = executor(0, None);
        let err = exec.step(&batch(0), 1, StepMode::Train).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Seq2SeqError>(),
            Some(&Seq2SeqError::LengthMismatch { stream: "Encoder 1", expected: 5, actual: 3 })
        );
        assert!(exec.step(&batch(0), 7, StepMode::Train).is_err());
    }

    #[test]
    fn test_decay_multiplies_learning_rate() {
        let mut exec = executor(0, None);
        exec.decay_learning_rate();
        assert!((exec.learning_rate() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_checkpoint_restores_counters() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();

        let mut exec = executor(0, None).with_checkpoints(manager.clone());
        exec.step(&batch(1), 1, StepMode::Train).unwrap();
        exec.decay_learning_rate();
        exec.save_checkpoint().unwrap();

        let restored = executor(0, None).with_checkpoints(manager).restore(None).unwrap();
        assert_eq!(restored.global_step(), 1);
        assert!((restored.learning_rate() - 0.005).abs() < 1e-12);

        let fresh = executor(0, None).restore(None).unwrap();
        assert_eq!(fresh.global_step(), 0);
    }

    #[test]
    fn test_constants_stay_frozen_after_restore() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();

        let mut exec = executor(0, None).with_checkpoints(manager.clone());
        exec.step(&batch(1), 1, StepMode::Train).unwrap();
        exec.save_checkpoint().unwrap();

        let mut restored = executor(0, None).with_checkpoints(manager).restore(None).unwrap();
        let constants = |exec: &BurnStepExecutor<B, _>| {
            let model = exec.model();
            let read = |t: Tensor<B, 2>| t.into_data().to_vec::<f32>().unwrap();
            let bias = model.output_projection.bias.as_ref().unwrap().val();
            (
                read(model.source_embedding_1.weight.val()),
                read(model.source_embedding_2.weight.val()),
                bias.into_data().to_vec::<f32>().unwrap(),
            )
        };
        let before = constants(&restored);
        for _ in 0..3 {
            restored.step(&batch(1), 1, StepMode::Train).unwrap();
        }
        assert_eq!(restored.global_step(), 4);
        assert_eq!(before, constants(&restored));
        assert!(before.2.iter().all(|&b| b == 0.0));
    }
}
