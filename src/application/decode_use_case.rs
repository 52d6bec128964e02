// ============================================================
// Layer 2 — DecodeUseCase
// ============================================================
// Interactive translation with a trained model:
//
//   Step 1: Rebuild the architecture from train_config.json
//   Step 2: Load the three vocabularies
//   Step 3: Restore the named (or latest) snapshot
//   Step 4: Translate paired input lines until input runs out
//
// Protocol: every request is two lines, source-1 text then
// source-2 text, answered by one line of target text. Either two
// interleaved lines on stdin, or one line from each of two files.

use anyhow::{bail, Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

use crate::application::train_use_case::{
    build_executor, BackendKind, TrainConfig, Vocabularies,
};
use crate::data::batcher::build_batch;
use crate::domain::example::{Example, EOS_ID};
use crate::domain::traits::{DecodedOutput, StepExecutor, StepMode, TokenBridge};
use crate::infra::checkpoint::CheckpointManager;

// ─── Translator ───────────────────────────────────────────────────────────────
/// Sentence-pair → sentence translation over any step executor.
pub struct Translator<E, V> {
    executor:       E,
    source_vocab_1: V,
    source_vocab_2: V,
    target_vocab:   V,
    rng:            StdRng,
}

impl<E: StepExecutor, V: TokenBridge> Translator<E, V> {
    pub fn new(executor: E, source_vocab_1: V, source_vocab_2: V, target_vocab: V, seed: u64) -> Self {
        Self {
            executor,
            source_vocab_1,
            source_vocab_2,
            target_vocab,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Translate one request
    pub fn translate(&mut self, sentence_1: &str, sentence_2: &str) -> Result<String> {
        let largest = self.executor.buckets().largest();

        let mut ids_1 = self.source_vocab_1.encode(sentence_1)?;
        let mut ids_2 = self.source_vocab_2.encode(sentence_2)?;
        ids_1.truncate(largest.source_len_1);
        ids_2.truncate(largest.source_len_2);

        // Falls back to the largest bucket; truncation keeps it valid
        let bucket_id = self.executor.buckets().select_for_sources(ids_1.len(), ids_2.len());
        let bucket = self.executor.buckets().get(bucket_id)?;

        let example = [Example::new(ids_1, ids_2, Vec::new())];
        let batch = build_batch(&example, bucket_id, &bucket, 1, &mut self.rng)?;
        let output = self.executor.step(&batch, bucket_id, StepMode::Infer)?;

        let mut symbols = match output.outputs {
            Some(DecodedOutput::Symbols(rows)) => {
                rows.iter().filter_map(|slots| slots.first().copied()).collect::<Vec<_>>()
            }
            Some(DecodedOutput::Logits(rows)) => rows
                .iter()
                .filter_map(|slots| slots.first())
                .map(|logits| argmax(logits))
                .collect(),
            None => bail!("inference step returned no output"),
        };

        // Without an EOS the whole sequence is kept
        if let Some(end) = symbols.iter().position(|&id| id == EOS_ID) {
            symbols.truncate(end);
        }
        Ok(self.target_vocab.decode(&symbols))
    }

    /// Requests as interleaved line pairs from one reader.
    /// A trailing unpaired line is ignored.
    pub fn run_interleaved<R: BufRead, W: Write>(&mut self, input: R, out: W) -> Result<usize> {
        let mut lines = input.lines();
        let pairs = std::iter::from_fn(move || match (lines.next(), lines.next()) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        });
        self.run_pairs(pairs, out)
    }

    /// Requests as aligned lines of two readers; stops at the
    /// end of the shorter one.
    pub fn run_paired<R1: BufRead, R2: BufRead, W: Write>(
        &mut self,
        input_1: R1,
        input_2: R2,
        out:     W,
    ) -> Result<usize> {
        let pairs = input_1.lines().zip(input_2.lines());
        self.run_pairs(pairs, out)
    }

    fn run_pairs<I, W>(&mut self, pairs: I, mut out: W) -> Result<usize>
    where
        I: Iterator<Item = (io::Result<String>, io::Result<String>)>,
        W: Write,
    {
        let mut count = 0usize;
        for (line_1, line_2) in pairs {
            let translation = self.translate(&line_1?, &line_2?)?;
            writeln!(out, "{translation}")?;
            out.flush()?;
            count += 1;
        }
        tracing::debug!("Translated {} requests", count);
        Ok(count)
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(id, _)| id as u32)
        .unwrap_or(EOS_ID)
}

// ─── DecodeUseCase ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Command-line configuration; the saved training config
    /// overrides its architecture fields
    pub train:   TrainConfig,
    /// Snapshot to restore; the latest one when None
    pub model:   Option<String>,
    pub input_1: Option<String>,
    pub input_2: Option<String>,
}

pub struct DecodeUseCase {
    config: DecodeConfig,
}

impl DecodeUseCase {
    pub fn new(config: DecodeConfig) -> Self {
        Self { config }
    }

    /// Decode to stdout
    pub fn execute(&self) -> Result<()> {
        let stdout = io::stdout();
        self.execute_with(stdout.lock())
    }

    pub fn execute_with<W: Write>(&self, out: W) -> Result<()> {
        if self.config.input_1.is_some() != self.config.input_2.is_some() {
            bail!("--input-1 and --input-2 must be given together");
        }
        match self.config.train.backend {
            BackendKind::Wgpu => {
                let device = WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                self.execute_on::<Autodiff<Wgpu>, W>(device, out)
            }
            BackendKind::Ndarray => {
                self.execute_on::<Autodiff<NdArray>, W>(NdArrayDevice::default(), out)
            }
        }
    }

    /// Architecture from the train directory, run settings from
    /// the command line
    fn resolve_config(&self, checkpoints: &CheckpointManager) -> Result<TrainConfig> {
        let cli = &self.config.train;
        match checkpoints.load_config()? {
            Some(saved) => Ok(TrainConfig {
                data_dir:         cli.data_dir.clone(),
                train_dir:        cli.train_dir.clone(),
                beam_size:        cli.beam_size,
                backend:          cli.backend,
                seed:             cli.seed,
                embedding_path_1: embedding_path(&cli.embedding_path_1, &saved.embedding_path_1),
                embedding_path_2: embedding_path(&cli.embedding_path_2, &saved.embedding_path_2),
                ..saved
            }),
            None => {
                tracing::warn!(
                    "No train_config.json in '{}', using command-line settings",
                    checkpoints.dir().display()
                );
                Ok(cli.clone())
            }
        }
    }

    fn execute_on<B: AutodiffBackend, W: Write>(&self, device: B::Device, out: W) -> Result<()> {
        // ── Step 1: Architecture ──────────────────────────────────────────────
        let checkpoints = CheckpointManager::new(&self.config.train.train_dir)?;
        let cfg = self.resolve_config(&checkpoints)?;

        // ── Step 2: Vocabularies ──────────────────────────────────────────────
        let vocabs = Vocabularies::load(&cfg)?;

        // ── Step 3: Model with beam search, restored ──────────────────────────
        let executor = build_executor::<B>(&cfg, vocabs.sizes(), Some(cfg.beam_size), device)?
            .with_checkpoints(checkpoints)
            .restore(self.config.model.as_deref())?;

        let Vocabularies { source_1, source_2, target } = vocabs;
        let mut translator = Translator::new(executor, source_1, source_2, target, cfg.seed);

        // ── Step 4: Translate ─────────────────────────────────────────────────
        let count = match (&self.config.input_1, &self.config.input_2) {
            (Some(path_1), Some(path_2)) => translator.run_paired(
                open(path_1)?,
                open(path_2)?,
                out,
            )?,
            _ => {
                let stdin = io::stdin();
                translator.run_interleaved(stdin.lock(), out)?
            }
        };
        tracing::info!("Decoded {} sentence pairs", count);
        Ok(())
    }
}

/// A table given on the command line wins. A saved path that no
/// longer exists is dropped: the restored snapshot holds the table.
fn embedding_path(cli: &Option<String>, saved: &Option<String>) -> Option<String> {
    if cli.is_some() {
        return cli.clone();
    }
    match saved {
        Some(path) if !Path::new(path).exists() => {
            tracing::warn!("Embedding table '{}' is gone, relying on the snapshot", path);
            None
        }
        other => other.clone(),
    }
}

fn open(path: &str) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Cannot open input '{path}'"))?;
    Ok(BufReader::new(file))
}
