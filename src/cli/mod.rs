// ============================================================
// Layer 1: CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with clap.
// All business logic is delegated to Layer 2 (application).
//
// Four commands are supported:
//   1. `build-tokenizers`   → train and store the tokenizer
//   2. `most-common-tokens` → per-language token statistics
//   3. `train`              → train (or continue) a context
//   4. `predict`            → retrieve code for the queries

pub mod commands;

use anyhow::Result;
use clap::Parser;

use crate::application::predict_use_case::PredictUseCase;
use crate::application::tokenizers_use_case::TokenizersUseCase;
use crate::application::train_use_case::TrainUseCase;
use crate::domain::split::DatasetSplit;
use commands::{load_config, BuildTokenizersArgs, Commands, MostCommonTokensArgs, PredictArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "query-code-siamese",
    version = "0.1.0",
    about = "Train a siamese query/code encoder, then retrieve code definitions for natural-language queries."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::BuildTokenizers(args)  => run_build_tokenizers(args),
            Commands::MostCommonTokens(args) => run_most_common_tokens(args),
            Commands::Train(args)            => run_train(args),
            Commands::Predict(args)          => run_predict(args),
        }
    }
}

fn run_build_tokenizers(args: BuildTokenizersArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let split: DatasetSplit = args.split.parse()?;
    let size = TokenizersUseCase::new(config).build_tokenizers(split, args.per_language)?;
    println!("Tokenizer built from the {split} split ({size} entries).");
    Ok(())
}

fn run_most_common_tokens(args: MostCommonTokensArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let common = TokenizersUseCase::new(config).most_common_tokens(args.top)?;
    for (lang, tokens) in &common.tokens {
        let shown: Vec<&str> = tokens.iter().take(10).map(|(t, _)| t.as_str()).collect();
        println!("{lang}: {}", shown.join(" "));
    }
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    tracing::info!("Starting training with config '{}'", args.config.display());
    let summary = TrainUseCase::try_from(args)?.execute()?;
    match summary.best_epoch {
        Some(epoch) => println!(
            "Training complete. Best val_loss {:.4} at epoch {} saved to '{}'.",
            summary.best_val_loss,
            epoch,
            summary.best_dir.display()
        ),
        None => println!("Training complete. Context saved to '{}'.", summary.last_dir.display()),
    }
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let out = PredictUseCase::from(args).execute()?;
    println!("Predictions written to '{}'.", out.display());
    Ok(())
}
