// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load the three vocabularies      (Layer 6 - infra)
//   Step 2: Read dev and train id files      (Layer 4 - data)
//   Step 3: Build the model and executor     (Layer 5 - ml)
//   Step 4: Restore the latest snapshot      (Layer 6 - infra)
//   Step 5: Save config for decoding         (Layer 6 - infra)
//   Step 6: Run the training loop            (Layer 5 - ml)
//
// Also hosts the self-test: a toy model trained for a few steps
// on an in-memory data set, exercising the real engine end to end.

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    optim::{AdamConfig, Optimizer},
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{dataset::BucketedDataset, reader::read_data};
use crate::domain::bucket::{Bucket, BucketTable};
use crate::domain::example::Example;
use crate::infra::{
    checkpoint::CheckpointManager,
    embeddings::ConstantEmbedding,
    metrics::MetricsLogger,
    vocabulary::Vocabulary,
};
use crate::ml::executor::{BurnStepExecutor, ExecutorSettings};
use crate::ml::model::{DualSourceSeq2Seq, Seq2SeqConfig};
use crate::ml::trainer::{Trainer, TrainerSettings};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Serialisable so it can be saved to disk and reloaded for decoding.

/// Which Burn backend runs the numeric work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Wgpu,
    Ndarray,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_dir:                   String,
    pub train_dir:                  String,
    pub learning_rate:              f64,
    pub learning_rate_decay_factor: f64,
    pub max_gradient_norm:          f64,
    pub batch_size:                 usize,
    pub hidden_edim:                usize,
    pub hidden_units:               usize,
    pub num_layers:                 usize,
    pub num_heads:                  usize,
    pub dropout:                    f64,
    pub beam_size:                  usize,
    pub en_vocab_size_1:            usize,
    pub en_vocab_size_2:            usize,
    pub fr_vocab_size:              usize,
    pub num_samples:                usize,
    pub steps_per_checkpoint:       u64,
    /// 0 = no limit
    pub max_train_data_size:        usize,
    /// 0 = train until interrupted
    pub max_steps:                  u64,
    pub embedding_path_1:           Option<String>,
    pub embedding_path_2:           Option<String>,
    pub buckets:                    BucketTable,
    pub seed:                       u64,
    pub backend:                    BackendKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:                   "data".to_string(),
            train_dir:                  "train".to_string(),
            learning_rate:              0.001,
            learning_rate_decay_factor: 0.99,
            max_gradient_norm:          1.0,
            batch_size:                 80,
            hidden_edim:                310,
            hidden_units:               500,
            num_layers:                 1,
            num_heads:                  4,
            dropout:                    0.2,
            beam_size:                  5,
            en_vocab_size_1:            15000,
            en_vocab_size_2:            10000,
            fr_vocab_size:              10000,
            num_samples:                10240,
            steps_per_checkpoint:       250,
            max_train_data_size:        0,
            max_steps:                  0,
            embedding_path_1:           None,
            embedding_path_2:           None,
            buckets:                    BucketTable::default(),
            seed:                       123,
            backend:                    BackendKind::Wgpu,
        }
    }
}

impl TrainConfig {
    /// Model architecture for the given (actual) vocabulary sizes
    pub fn model_config(&self, vocab_sizes: [usize; 3]) -> Seq2SeqConfig {
        let largest = self.buckets.largest();
        let max_seq_len = largest.source_len_1.max(largest.source_len_2).max(largest.target_len);
        Seq2SeqConfig::new(
            vocab_sizes[0],
            vocab_sizes[1],
            vocab_sizes[2],
            self.hidden_edim,
            self.hidden_units,
            self.num_layers,
            self.num_heads,
            max_seq_len,
        )
        .with_dropout(self.dropout)
    }

    pub fn executor_settings(&self, beam_width: Option<usize>) -> ExecutorSettings {
        ExecutorSettings {
            learning_rate:       self.learning_rate,
            learning_rate_decay: self.learning_rate_decay_factor,
            max_gradient_norm:   self.max_gradient_norm,
            num_samples:         self.num_samples,
            beam_width,
            seed:                self.seed,
        }
    }

    pub fn trainer_settings(&self) -> TrainerSettings {
        TrainerSettings {
            batch_size:           self.batch_size,
            steps_per_checkpoint: self.steps_per_checkpoint,
            max_steps:            self.max_steps,
            seed:                 self.seed,
        }
    }
}

// ─── Data layout ──────────────────────────────────────────────────────────────
/// File names under the data directory, keyed by configured
/// vocabulary sizes:
///   vocab{V}.en_1, train.ids{V}.en_1, dev.ids{V}.en_1, ... .fr
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub vocab:  [PathBuf; 3],
    pub train:  [PathBuf; 3],
    pub dev:    [PathBuf; 3],
}

impl DataFiles {
    pub fn new(cfg: &TrainConfig) -> Self {
        let dir = PathBuf::from(&cfg.data_dir);
        let streams = [
            (cfg.en_vocab_size_1, "en_1"),
            (cfg.en_vocab_size_2, "en_2"),
            (cfg.fr_vocab_size, "fr"),
        ];
        let named = |prefix: &str| streams.map(|(v, ext)| dir.join(format!("{prefix}{v}.{ext}")));
        Self {
            vocab: named("vocab"),
            train: named("train.ids"),
            dev:   named("dev.ids"),
        }
    }
}

/// The three vocabularies of a run: source-1, source-2, target
pub struct Vocabularies {
    pub source_1: Vocabulary,
    pub source_2: Vocabulary,
    pub target:   Vocabulary,
}

impl Vocabularies {
    pub fn load(cfg: &TrainConfig) -> Result<Self> {
        let files = DataFiles::new(cfg);
        let [v1, v2, vt] = &files.vocab;
        let vocabs = Self {
            source_1: Vocabulary::load(v1)?,
            source_2: Vocabulary::load(v2)?,
            target:   Vocabulary::load(vt)?,
        };

        let configured = [cfg.en_vocab_size_1, cfg.en_vocab_size_2, cfg.fr_vocab_size];
        for (size, actual) in configured.iter().zip(vocabs.sizes()) {
            if *size != actual {
                tracing::warn!("Configured vocabulary size {} adjusted to {}", size, actual);
            }
        }
        Ok(vocabs)
    }

    pub fn sizes(&self) -> [usize; 3] {
        [self.source_1.len(), self.source_2.len(), self.target.len()]
    }
}

// ─── Executor construction ────────────────────────────────────────────────────

fn constant_table(
    name:   &str,
    path:   Option<&str>,
    rows:   usize,
    dim:    usize,
    rng:    &mut StdRng,
) -> Result<ConstantEmbedding> {
    match path {
        Some(path) => ConstantEmbedding::load(path),
        None => {
            tracing::warn!("No constant embedding given for {}, using random values", name);
            Ok(ConstantEmbedding::random(rows, dim, rng))
        }
    }
}

/// Model + Adam + executor for one run. `beam_width` switches
/// infer steps to beam-searched symbols.
pub fn build_executor<B: AutodiffBackend>(
    cfg:         &TrainConfig,
    vocab_sizes: [usize; 3],
    beam_width:  Option<usize>,
    device:      B::Device,
) -> Result<BurnStepExecutor<B, impl Optimizer<DualSourceSeq2Seq<B>, B>>> {
    let model_cfg = cfg.model_config(vocab_sizes);
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let table_1 = constant_table(
        "source-1", cfg.embedding_path_1.as_deref(), vocab_sizes[0], cfg.hidden_edim, &mut rng,
    )?;
    let table_2 = constant_table(
        "source-2", cfg.embedding_path_2.as_deref(), vocab_sizes[1], cfg.hidden_edim, &mut rng,
    )?;

    let model = model_cfg.init::<B>(
        table_1.to_tensor(&device),
        table_2.to_tensor(&device),
        &device,
    )?;
    tracing::info!(
        "Model ready: {} layers, {} hidden units, {} heads",
        cfg.num_layers, cfg.hidden_units, cfg.num_heads,
    );

    let optimizer = AdamConfig::new().init::<B, DualSourceSeq2Seq<B>>();
    Ok(BurnStepExecutor::new(
        model,
        optimizer,
        cfg.buckets.clone(),
        cfg.executor_settings(beam_width),
        device,
    ))
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline on the configured backend
    pub fn execute(&self) -> Result<()> {
        match self.config.backend {
            BackendKind::Wgpu => {
                let device = WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                self.execute_on::<Autodiff<Wgpu>>(device)
            }
            BackendKind::Ndarray => self.execute_on::<Autodiff<NdArray>>(NdArrayDevice::default()),
        }
    }

    fn execute_on<B: AutodiffBackend>(&self, device: B::Device) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Vocabularies ──────────────────────────────────────────────
        let vocabs = Vocabularies::load(cfg)?;
        let files = DataFiles::new(cfg);

        // ── Step 2: Read dev and train data into buckets ──────────────────────
        tracing::info!(
            "Reading development and training data (limit: {}).",
            cfg.max_train_data_size
        );
        let [d1, d2, dt] = &files.dev;
        let dev = read_data(d1, d2, dt, &cfg.buckets, 0)?;
        let [t1, t2, tt] = &files.train;
        let train = read_data(t1, t2, tt, &cfg.buckets, cfg.max_train_data_size)?;

        // ── Step 3 + 4: Model, executor, latest snapshot ──────────────────────
        let checkpoints = CheckpointManager::new(&cfg.train_dir)?;
        let executor = build_executor::<B>(cfg, vocabs.sizes(), None, device)?
            .with_checkpoints(checkpoints.clone())
            .restore(None)?;

        // ── Step 5: Save config for decoding ──────────────────────────────────
        checkpoints.save_config(cfg)?;

        // ── Step 6: Training loop ─────────────────────────────────────────────
        let metrics = MetricsLogger::new(&cfg.train_dir, cfg.buckets.len())?;
        let mut trainer = Trainer::new(executor, cfg.trainer_settings()).with_metrics(metrics);
        trainer.run(&train, &dev)?;

        tracing::info!("Training complete!");
        Ok(())
    }
}

// ─── Self-test ────────────────────────────────────────────────────────────────

/// Configuration of the toy self-test model
pub fn self_test_config() -> Result<TrainConfig> {
    Ok(TrainConfig {
        learning_rate:        0.01,
        batch_size:           32,
        hidden_edim:          16,
        hidden_units:         32,
        num_layers:           2,
        num_heads:            4,
        max_gradient_norm:    5.0,
        en_vocab_size_1:      10,
        en_vocab_size_2:      10,
        fr_vocab_size:        10,
        num_samples:          8,
        steps_per_checkpoint: 5,
        max_steps:            5,
        buckets:              BucketTable::new(vec![Bucket::new(3, 3, 3), Bucket::new(6, 6, 6)])?,
        backend:              BackendKind::Ndarray,
        ..TrainConfig::default()
    })
}

/// Train a toy dual-source model for a few steps on fake data
pub fn run_self_test() -> Result<()> {
    let cfg = self_test_config()?;
    let data = BucketedDataset::from_pools(vec![
        vec![
            Example::new(vec![1, 1], vec![1, 1], vec![2, 2]),
            Example::new(vec![3, 3], vec![3], vec![4]),
            Example::new(vec![5], vec![5, 5], vec![6]),
        ],
        vec![
            Example::new(vec![1, 1, 1, 1, 1], vec![1, 1, 1], vec![2, 2, 2, 2, 2]),
            Example::new(vec![3, 3, 3], vec![3, 3, 3, 3], vec![5, 6]),
        ],
    ]);

    let executor = build_executor::<Autodiff<NdArray>>(
        &cfg,
        [cfg.en_vocab_size_1, cfg.en_vocab_size_2, cfg.fr_vocab_size],
        None,
        NdArrayDevice::default(),
    )?;
    let mut trainer = Trainer::new(executor, cfg.trainer_settings());
    trainer.run(&data, &data)?;

    tracing::info!("Self-test finished: loss history {:?}", trainer.history().as_slice());
    Ok(())
}
