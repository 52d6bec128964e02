// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `decode` and
// `self-test`, and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for bad values
//   - type conversion (string → usize, f64, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use crate::application::decode_use_case::DecodeConfig;
use crate::application::train_use_case::{BackendKind, TrainConfig};
use crate::domain::bucket::{Bucket, BucketTable};

/// The top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a translation model on the id files in --data-dir
    Train(TrainArgs),

    /// Translate sentence pairs with a trained model
    Decode(DecodeArgs),

    /// Train a toy model for a few steps on built-in data
    SelfTest,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendArg {
    Wgpu,
    Ndarray,
}

impl From<BackendArg> for BackendKind {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Wgpu    => BackendKind::Wgpu,
            BackendArg::Ndarray => BackendKind::Ndarray,
        }
    }
}

/// All arguments for the `train` command.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Data directory (vocabularies and id files)
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Training directory (snapshots, config, metrics)
    #[arg(long, default_value = "train")]
    pub train_dir: String,

    #[arg(long, default_value_t = 0.001)]
    pub learning_rate: f64,

    /// Learning rate is multiplied by this when loss stops improving
    #[arg(long, default_value_t = 0.99)]
    pub learning_rate_decay_factor: f64,

    /// Clip gradients to this global norm
    #[arg(long, default_value_t = 1.0)]
    pub max_gradient_norm: f64,

    #[arg(long, default_value_t = 80)]
    pub batch_size: usize,

    /// Dimension of the constant source embeddings
    #[arg(long, default_value_t = 310)]
    pub hidden_edim: usize,

    /// Size of each model layer; must be even
    #[arg(long, default_value_t = 500)]
    pub size: usize,

    #[arg(long, default_value_t = 1)]
    pub num_layers: usize,

    /// Attention heads; must divide --size
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    /// Dropout probability on layer inputs
    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    /// Beam width for decoding (1 = greedy)
    #[arg(long, default_value_t = 5)]
    pub beam_size: usize,

    /// Source-1 vocabulary size
    #[arg(long, default_value_t = 15000)]
    pub en_vocab_size_1: usize,

    /// Source-2 vocabulary size
    #[arg(long, default_value_t = 10000)]
    pub en_vocab_size_2: usize,

    /// Target vocabulary size
    #[arg(long, default_value_t = 10000)]
    pub fr_vocab_size: usize,

    /// Sampled softmax candidates per step (0 = full softmax)
    #[arg(long, default_value_t = 10240)]
    pub num_samples: usize,

    /// How many training steps to do per checkpoint
    #[arg(long, default_value_t = 250)]
    pub steps_per_checkpoint: u64,

    /// Limit on the size of training data (0: no limit)
    #[arg(long, default_value_t = 0)]
    pub max_train_data_size: usize,

    /// Stop after this many steps (0: train until interrupted)
    #[arg(long, default_value_t = 0)]
    pub max_steps: u64,

    /// Constant embedding table for source 1 (JSON rows)
    #[arg(long)]
    pub embedding_1: Option<String>,

    /// Constant embedding table for source 2 (JSON rows)
    #[arg(long)]
    pub embedding_2: Option<String>,

    /// Bucket capacities as SOURCE1,SOURCE2,TARGET; repeat in
    /// increasing order. Defaults to the built-in table.
    #[arg(long = "bucket", value_parser = parse_bucket)]
    pub buckets: Vec<Bucket>,

    #[arg(long, default_value_t = 123)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = BackendArg::Wgpu)]
    pub backend: BackendArg,
}

fn parse_bucket(s: &str) -> Result<Bucket, String> {
    let sizes = s
        .split(',')
        .map(|part| part.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("bad bucket '{s}': {e}"))?;
    match sizes[..] {
        [s1, s2, t] => Ok(Bucket::new(s1, s2, t)),
        _ => Err(format!("bucket '{s}' needs three sizes")),
    }
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl TryFrom<TrainArgs> for TrainConfig {
    type Error = anyhow::Error;

    fn try_from(a: TrainArgs) -> Result<Self> {
        let buckets = if a.buckets.is_empty() {
            BucketTable::default()
        } else {
            BucketTable::new(a.buckets)?
        };
        Ok(TrainConfig {
            data_dir:                   a.data_dir,
            train_dir:                  a.train_dir,
            learning_rate:              a.learning_rate,
            learning_rate_decay_factor: a.learning_rate_decay_factor,
            max_gradient_norm:          a.max_gradient_norm,
            batch_size:                 a.batch_size,
            hidden_edim:                a.hidden_edim,
            hidden_units:               a.size,
            num_layers:                 a.num_layers,
            num_heads:                  a.num_heads,
            dropout:                    a.dropout,
            beam_size:                  a.beam_size,
            en_vocab_size_1:            a.en_vocab_size_1,
            en_vocab_size_2:            a.en_vocab_size_2,
            fr_vocab_size:              a.fr_vocab_size,
            num_samples:                a.num_samples,
            steps_per_checkpoint:       a.steps_per_checkpoint,
            max_train_data_size:        a.max_train_data_size,
            max_steps:                  a.max_steps,
            embedding_path_1:           a.embedding_1,
            embedding_path_2:           a.embedding_2,
            buckets,
            seed:                       a.seed,
            backend:                    a.backend.into(),
        })
    }
}

/// All arguments for the `decode` command.
/// Architecture flags are replaced by the saved training config
/// when the train directory has one.
#[derive(Args, Debug)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub train: TrainArgs,

    /// Snapshot to restore, e.g. translate.ckpt-250 (default: latest)
    #[arg(long)]
    pub model: Option<String>,

    /// Source-1 sentences, one per line (default: interleaved stdin)
    #[arg(long)]
    pub input_1: Option<String>,

    /// Source-2 sentences, aligned with --input-1
    #[arg(long)]
    pub input_2: Option<String>,
}

impl TryFrom<DecodeArgs> for DecodeConfig {
    type Error = anyhow::Error;

    fn try_from(a: DecodeArgs) -> Result<Self> {
        Ok(DecodeConfig {
            train:   a.train.try_into()?,
            model:   a.model,
            input_1: a.input_1,
            input_2: a.input_2,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["dualsrc-translate"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn test_train_defaults() {
        let Commands::Train(args) = parse(&["train"]) else { panic!("expected train") };
        let cfg = TrainConfig::try_from(args).unwrap();
        assert_eq!(cfg.hidden_units, 500);
        assert_eq!(cfg.hidden_edim, 310);
        assert_eq!(cfg.en_vocab_size_1, 15000);
        assert_eq!(cfg.beam_size, 5);
        assert_eq!(cfg.buckets, BucketTable::default());
        assert_eq!(cfg.backend, BackendKind::Wgpu);
    }

    #[test]
    fn test_custom_buckets_and_backend() {
        let Commands::Train(args) = parse(&[
            "train", "--bucket", "3,3,3", "--bucket", "6,6,6", "--backend", "ndarray",
        ]) else {
            panic!("expected train")
        };
        let cfg = TrainConfig::try_from(args).unwrap();
        assert_eq!(cfg.buckets.len(), 2);
        assert_eq!(cfg.buckets.largest(), Bucket::new(6, 6, 6));
        assert_eq!(cfg.backend, BackendKind::Ndarray);
    }

    #[test]
    fn test_unordered_buckets_rejected() {
        let Commands::Train(args) = parse(&["train", "--bucket", "6,6,6", "--bucket", "3,3,3"])
        else {
            panic!("expected train")
        };
        assert!(TrainConfig::try_from(args).is_err());
    }

    #[test]
    fn test_malformed_bucket_rejected() {
        let argv = ["dualsrc-translate", "train", "--bucket", "3,3"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_decode_flags() {
        let Commands::Decode(args) = parse(&[
            "decode", "--model", "translate.ckpt-250", "--beam-size", "1",
            "--input-1", "a.txt", "--input-2", "b.txt",
        ]) else {
            panic!("expected decode")
        };
        let cfg = DecodeConfig::try_from(args).unwrap();
        assert_eq!(cfg.model.as_deref(), Some("translate.ckpt-250"));
        assert_eq!(cfg.train.beam_size, 1);
        assert_eq!(cfg.input_2.as_deref(), Some("b.txt"));
    }

    #[test]
    fn test_self_test_command() {
        assert!(matches!(parse(&["self-test"]), Commands::SelfTest));
    }
}
