// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Step-based training over a bucketed data set. The loop knows
// nothing about Burn: it drives any StepExecutor.
//
// Every step:
//   1. draw u ~ U[0, 1) and pick the first bucket whose cumulative
//      scale exceeds u (buckets weighted by their size)
//   2. build a batch from that bucket's pool
//   3. run a Train step and add step time and loss, each divided
//      by the checkpoint interval, to the running averages
//
// Every `steps_per_checkpoint` steps:
//   - report perplexity = exp(avg loss), +inf from a loss of 300
//   - decay the learning rate once if the loss is worse than each
//     of the last three checkpoint losses
//   - append the loss to the history, save a snapshot
//   - reset the averages and run one Infer step per dev bucket
//
// Reference: Sutskever et al. (2014) Sequence to Sequence Learning

use anyhow::{bail, Result};
use rand::{rngs::StdRng, SeedableRng};
use std::time::Instant;

use crate::data::batcher::build_batch;
use crate::data::dataset::{sample_bucket, BucketedDataset};
use crate::domain::traits::{StepExecutor, StepMode};
use crate::infra::metrics::{CheckpointMetrics, MetricsLogger};

/// No decay once the learning rate is this small
const MIN_LEARNING_RATE: f64 = 1e-12;

/// Losses at or above this report an infinite perplexity
const PERPLEXITY_LOSS_CAP: f64 = 300.0;

pub fn perplexity(loss: f64) -> f64 {
    if loss < PERPLEXITY_LOSS_CAP { loss.exp() } else { f64::INFINITY }
}

// ─── LossHistory ──────────────────────────────────────────────────────────────
/// Average loss of every checkpoint so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossHistory {
    losses: Vec<f64>,
}

impl LossHistory {
    /// More than two entries, `loss` above the maximum of the last
    /// three and the learning rate above the floor.
    pub fn should_decay(&self, loss: f64, learning_rate: f64) -> bool {
        if self.losses.len() <= 2 || learning_rate <= MIN_LEARNING_RATE {
            return false;
        }
        let recent_max = self.losses[self.losses.len() - 3..]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        loss > recent_max
    }

    pub fn push(&mut self, loss: f64) {
        self.losses.push(loss);
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.losses
    }
}

impl From<Vec<f64>> for LossHistory {
    fn from(losses: Vec<f64>) -> Self {
        Self { losses }
    }
}

// ─── Trainer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub batch_size:           usize,
    pub steps_per_checkpoint: u64,
    /// 0 = train until interrupted
    pub max_steps:            u64,
    pub seed:                 u64,
}

pub struct Trainer<E> {
    executor: E,
    settings: TrainerSettings,
    rng:      StdRng,
    history:  LossHistory,
    metrics:  Option<MetricsLogger>,
}

impl<E: StepExecutor> Trainer<E> {
    pub fn new(executor: E, settings: TrainerSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self { executor, settings, rng, history: LossHistory::default(), metrics: None }
    }

    pub fn with_metrics(mut self, metrics: MetricsLogger) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_history(mut self, history: LossHistory) -> Self {
        self.history = history;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn history(&self) -> &LossHistory {
        &self.history
    }

    /// Train on `train`, evaluating on `dev` at every checkpoint.
    /// Returns after `max_steps` steps, never when that is 0.
    pub fn run(&mut self, train: &BucketedDataset, dev: &BucketedDataset) -> Result<()> {
        if train.total_size() == 0 {
            bail!("training set is empty: no example fits any bucket");
        }
        let scale = train.bucket_scale();
        tracing::info!("Train bucket sizes: {:?}", train.bucket_sizes());

        let interval = self.settings.steps_per_checkpoint.max(1);
        let mut step_time = 0.0f64;
        let mut loss = 0.0f64;
        let mut steps_run = 0u64;

        while self.settings.max_steps == 0 || steps_run < self.settings.max_steps {
            // ── Get a batch and make a step ───────────────────────────────────
            let bucket_id = sample_bucket(&scale, &mut self.rng);
            let bucket = self.executor.buckets().get(bucket_id)?;

            let start = Instant::now();
            let batch = build_batch(
                train.pool(bucket_id),
                bucket_id,
                &bucket,
                self.settings.batch_size,
                &mut self.rng,
            )?;
            let output = self.executor.step(&batch, bucket_id, StepMode::Train)?;

            step_time += start.elapsed().as_secs_f64() / interval as f64;
            loss += output.loss / interval as f64;
            steps_run += 1;

            // ── Checkpoint, statistics and evals ──────────────────────────────
            // Counted in steps of this run: averages divide by `interval`
            if steps_run % interval == 0 {
                self.on_checkpoint(loss, step_time, dev)?;
                step_time = 0.0;
                loss = 0.0;
            }
        }
        Ok(())
    }

    /// Everything that happens once per checkpoint interval
    pub fn on_checkpoint(
        &mut self,
        loss:      f64,
        step_time: f64,
        dev:       &BucketedDataset,
    ) -> Result<CheckpointMetrics> {
        let train_perplexity = perplexity(loss);
        tracing::info!(
            "global step {} learning rate {:.6} step-time {:.2} perplexity {:.2}",
            self.executor.global_step(),
            self.executor.learning_rate(),
            step_time,
            train_perplexity,
        );

        // Decrease learning rate if no improvement was seen over last 3 times
        if self.history.should_decay(loss, self.executor.learning_rate()) {
            self.executor.decay_learning_rate();
            tracing::info!("Learning rate decayed to {:.6}", self.executor.learning_rate());
        }
        self.history.push(loss);

        self.executor.save_checkpoint()?;

        let eval_perplexity = self.evaluate(dev)?;

        let metrics = CheckpointMetrics {
            global_step:   self.executor.global_step(),
            learning_rate: self.executor.learning_rate(),
            step_time,
            perplexity:    train_perplexity,
            eval_perplexity,
        };
        if let Some(logger) = &self.metrics {
            logger.log(&metrics)?;
        }
        Ok(metrics)
    }

    /// One Infer step per bucket of `dev`; None for empty buckets
    pub fn evaluate(&mut self, dev: &BucketedDataset) -> Result<Vec<Option<f64>>> {
        let mut results = Vec::with_capacity(dev.num_buckets());
        for bucket_id in 0..dev.num_buckets() {
            let pool = dev.pool(bucket_id);
            if pool.is_empty() {
                tracing::info!("  eval: empty bucket {}", bucket_id);
                results.push(None);
                continue;
            }
            let bucket = self.executor.buckets().get(bucket_id)?;
            let batch = build_batch(pool, bucket_id, &bucket, self.settings.batch_size, &mut self.rng)?;
            let output = self.executor.step(&batch, bucket_id, StepMode::Infer)?;

            let eval_perplexity = perplexity(output.loss);
            tracing::info!("  eval: bucket {} perplexity {:.2}", bucket_id, eval_perplexity);
            results.push(Some(eval_perplexity));
        }
        Ok(results)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::batch::Batch;
    use crate::domain::bucket::{Bucket, BucketTable};
    use crate::domain::example::Example;
    use crate::domain::traits::StepOutput;

    /// Records every call; always reports the same loss.
    struct StubExecutor {
        buckets:       BucketTable,
        loss:          f64,
        learning_rate: f64,
        global_step:   u64,
        decays:        usize,
        saves:         usize,
        train_buckets: Vec<usize>,
        infer_buckets: Vec<usize>,
    }

    impl StubExecutor {
        fn new(loss: f64) -> Self {
            Self {
                buckets: BucketTable::new(vec![Bucket::new(3, 3, 3), Bucket::new(6, 6, 6)]).unwrap(),
                loss,
                learning_rate: 0.5,
                global_step: 0,
                decays: 0,
                saves: 0,
                train_buckets: Vec::new(),
                infer_buckets: Vec::new(),
            }
        }
    }

    impl StepExecutor for StubExecutor {
        fn buckets(&self) -> &BucketTable {
            &self.buckets
        }

        fn step(&mut self, batch: &Batch, bucket_id: usize, mode: StepMode) -> Result<StepOutput> {
            batch.check_against(&self.buckets.get(bucket_id)?)?;
            match mode {
                StepMode::Train => {
                    self.global_step += 1;
                    self.train_buckets.push(bucket_id);
                }
                StepMode::Infer => self.infer_buckets.push(bucket_id),
            }
            Ok(StepOutput { gradient_norm: None, loss: self.loss, outputs: None })
        }

        fn learning_rate(&self) -> f64 {
            self.learning_rate
        }

        fn decay_learning_rate(&mut self) {
            self.learning_rate *= 0.5;
            self.decays += 1;
        }

        fn global_step(&self) -> u64 {
            self.global_step
        }

        fn save_checkpoint(&mut self) -> Result<()> {
            self.saves += 1;
            Ok(())
        }
    }

    fn settings(steps_per_checkpoint: u64, max_steps: u64) -> TrainerSettings {
        TrainerSettings { batch_size: 4, steps_per_checkpoint, max_steps, seed: 11 }
    }

    fn short() -> Example {
        Example::from_raw(&[4], &[5], &[6])
    }

    #[test]
    fn test_perplexity_cap() {
        assert_eq!(perplexity(301.0), f64::INFINITY);
        assert_eq!(perplexity(300.0), f64::INFINITY);
        assert_eq!(perplexity(0.0), 1.0);
        assert!((perplexity(1.0) - std::f64::consts::E).abs() < 1e-12);
    }

    #[test]
    fn test_should_decay_needs_three_worse_checkpoints() {
        let history = LossHistory::from(vec![1.0, 1.0]);
        assert!(!history.should_decay(5.0, 0.1));

        let history = LossHistory::from(vec![9.0, 1.0, 1.0, 1.0]);
        assert!(history.should_decay(1.5, 0.1));
        assert!(!history.should_decay(1.0, 0.1));
        assert!(!history.should_decay(1.5, 1e-12));

        let history = LossHistory::from(vec![2.0, 2.1, 1.9]);
        assert!(!history.should_decay(2.05, 0.1));
    }

    #[test]
    fn test_decay_happens_once_per_checkpoint() {
        let mut trainer = Trainer::new(StubExecutor::new(1.5), settings(10, 0))
            .with_history(LossHistory::from(vec![1.0, 1.0, 1.0]));
        let dev = BucketedDataset::new(2);

        trainer.on_checkpoint(1.5, 0.0, &dev).unwrap();
        assert_eq!(trainer.executor().decays, 1);
        assert!((trainer.executor().learning_rate() - 0.25).abs() < 1e-12);
        assert_eq!(trainer.history().as_slice(), &[1.0, 1.0, 1.0, 1.5]);
        assert_eq!(trainer.executor().saves, 1);
    }

    #[test]
    fn test_eval_skips_empty_buckets() {
        let mut trainer = Trainer::new(StubExecutor::new(0.0), settings(10, 0));
        let dev = BucketedDataset::from_pools(vec![Vec::new(), vec![short()]]);

        let eval = trainer.evaluate(&dev).unwrap();
        assert_eq!(eval, vec![None, Some(1.0)]);
        assert_eq!(trainer.executor().infer_buckets, vec![1]);
    }

    #[test]
    fn test_run_checkpoints_on_interval() {
        let mut trainer = Trainer::new(StubExecutor::new(2.0), settings(3, 7));
        let train = BucketedDataset::from_pools(vec![vec![short()], vec![short(); 3]]);
        let dev = BucketedDataset::from_pools(vec![vec![short()], vec![short()]]);

        trainer.run(&train, &dev).unwrap();

        let exec = trainer.executor();
        assert_eq!(exec.global_step, 7);
        assert_eq!(exec.saves, 2);
        assert_eq!(exec.infer_buckets, vec![0, 1, 0, 1]);
        // Constant loss is averaged back to itself
        for &loss in trainer.history().as_slice() {
            assert!((loss - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_resumed_run_checkpoints_after_full_interval() {
        let mut stub = StubExecutor::new(1.0);
        stub.global_step = 250;
        let mut trainer = Trainer::new(stub, settings(100, 100));
        let train = BucketedDataset::from_pools(vec![vec![short()], vec![short()]]);

        trainer.run(&train, &BucketedDataset::new(2)).unwrap();

        assert_eq!(trainer.executor().global_step, 350);
        assert_eq!(trainer.executor().saves, 1);
        assert_eq!(trainer.history().as_slice().len(), 1);
        assert!((trainer.history().as_slice()[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_never_picks_empty_train_bucket() {
        let mut trainer = Trainer::new(StubExecutor::new(1.0), settings(100, 50));
        let train = BucketedDataset::from_pools(vec![Vec::new(), vec![short()]]);
        trainer.run(&train, &BucketedDataset::new(2)).unwrap();
        assert!(trainer.executor().train_buckets.iter().all(|&b| b == 1));
    }

    #[test]
    fn test_run_rejects_empty_training_set() {
        let mut trainer = Trainer::new(StubExecutor::new(1.0), settings(10, 5));
        assert!(trainer.run(&BucketedDataset::new(2), &BucketedDataset::new(2)).is_err());
    }
}
