// ============================================================
// Layer 1: CLI Commands and Arguments
// ============================================================
// Every run is driven by a JSON context config (see
// domain::config); the flags here only pick what to run and
// where to restore from.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::application::predict_use_case::PredictUseCase;
use crate::application::train_use_case::TrainUseCase;
use crate::domain::config::ContextConfig;
use crate::infra::record::read_config_file;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the tokenizer on one split and store it
    BuildTokenizers(BuildTokenizersArgs),

    /// Count the most common code tokens per language
    MostCommonTokens(MostCommonTokensArgs),

    /// Train a query/code encoder
    Train(TrainArgs),

    /// Retrieve code definitions for every query with a saved context
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
pub struct BuildTokenizersArgs {
    /// JSON context configuration
    #[arg(long)]
    pub config: PathBuf,

    /// Split whose directories the tokenizer is trained on
    /// (train, val or test)
    #[arg(long, default_value = "train")]
    pub split: String,

    /// Also build one query and one code vocabulary per language
    #[arg(long)]
    pub per_language: bool,
}

#[derive(Args, Debug)]
pub struct MostCommonTokensArgs {
    #[arg(long)]
    pub config: PathBuf,

    /// Tokens kept per language
    #[arg(long, default_value_t = 100)]
    pub top: usize,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long)]
    pub config: PathBuf,

    /// Saved context to continue from; its own config is used and only
    /// the device is taken from --config
    #[arg(long)]
    pub restore: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Saved context directory (for example <output_dir>/<name>/best)
    #[arg(long)]
    pub restore: PathBuf,
}

pub fn load_config(path: &Path) -> Result<ContextConfig> {
    read_config_file(path).with_context(|| format!("Cannot read config '{}'", path.display()))
}

/// Boundary between Layer 1 and Layer 2: the application layer
/// never sees clap types.
impl TryFrom<TrainArgs> for TrainUseCase {
    type Error = anyhow::Error;

    fn try_from(a: TrainArgs) -> Result<Self> {
        Ok(TrainUseCase::new(load_config(&a.config)?, a.restore))
    }
}

impl From<PredictArgs> for PredictUseCase {
    fn from(a: PredictArgs) -> Self {
        PredictUseCase::new(a.restore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["query-code-siamese", "build-tokenizers", "--config", "c.json"]).unwrap();
        match cli.command {
            Commands::BuildTokenizers(a) => {
                assert_eq!(a.split, "train");
                assert!(!a.per_language);
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::try_parse_from(["query-code-siamese", "train", "--config", "c.json", "--restore", "runs/last"]).unwrap();
        match cli.command {
            Commands::Train(a) => assert_eq!(a.restore, Some(PathBuf::from("runs/last"))),
            other => panic!("unexpected {other:?}"),
        }

        assert!(Cli::try_parse_from(["query-code-siamese", "predict"]).is_err());
    }

    #[test]
    fn test_bogus_split_is_a_configuration_error() {
        let err = "bogus".parse::<crate::domain::split::DatasetSplit>().unwrap_err();
        assert!(matches!(err, crate::domain::error::SiameseError::Configuration(_)));
    }
}
