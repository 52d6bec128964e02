// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `train`     — trains the model on bucketed id files
//   2. `decode`    — restores a snapshot and translates
//                    sentence pairs from stdin or two files
//   3. `self-test` — trains a toy model for a few steps
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, DecodeArgs, TrainArgs};

/// Command-line interface, parsed via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "dualsrc-translate",
    version = "0.1.0",
    about = "Train a dual-source attention translation model, then decode with it."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case; the CLI layer only routes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)  => run_train(args),
            Commands::Decode(args) => run_decode(args),
            Commands::SelfTest     => run_self_test(),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on data in: {}", args.data_dir);
    TrainUseCase::new(args.try_into()?).execute()
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    use crate::application::decode_use_case::DecodeUseCase;

    DecodeUseCase::new(args.try_into()?).execute()
}

fn run_self_test() -> Result<()> {
    crate::application::train_use_case::run_self_test()
}
